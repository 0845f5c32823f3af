//! Turning a collection page into a list of hub identifiers.
//!
//! Two tiers are tried in order: the JSON payload a page embeds as
//! `window.initialData=...`, which is exact and keeps the page ordering, and
//! link scraping over the rendered anchors, which over-approximates and has
//! no ordering. Both are pure functions over markup so they can be tested
//! without a network.

use std::collections::{BTreeSet, HashSet};

use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::data::PageSource;
use crate::error::CollectionError;
use crate::identifier::Identifier;

const INITIAL_DATA_MARKER: &str = "window.initialData=";
const SCRIPT_CLOSE: &str = "</script>";
const EXCLUDED_LINK_PARTS: [&str; 3] = ["/discussions", "/settings", "/community"];

/// What a collection page yielded, and through which tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageListing {
    /// Entries of the embedded `collection.models` payload, in page order.
    Collection(Vec<Identifier>),
    /// Identifiers recovered from anchors when no payload was usable.
    Links(BTreeSet<Identifier>),
}

impl PageListing {
    /// Deduplicated identifiers; page order is kept for the `Collection` tier.
    pub fn identifiers(&self) -> Vec<Identifier> {
        match self {
            PageListing::Collection(ids) => {
                let mut seen = HashSet::new();
                ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
            }
            PageListing::Links(ids) => ids.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.identifiers().len()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PageListing::Collection(ids) => ids.is_empty(),
            PageListing::Links(ids) => ids.is_empty(),
        }
    }
}

/// Checks that `page_url` parses and names both a host and a path.
pub fn validate_url(page_url: &str) -> Result<Url, CollectionError> {
    let url = Url::parse(page_url).map_err(|_| CollectionError::InvalidInput(page_url.to_string()))?;
    let has_host = url.host_str().map_or(false, |h| !h.is_empty());
    if !has_host || !has_path(page_url) {
        return Err(CollectionError::InvalidInput(page_url.to_string()));
    }
    Ok(url)
}

/// `Url` normalises a missing path to `/`, so the raw text decides whether one was given.
fn has_path(page_url: &str) -> bool {
    page_url.split_once("://")
        .and_then(|(_, rest)| rest.split(['?', '#']).next())
        .map_or(false, |authority_and_path| authority_and_path.contains('/'))
}

/// Resolves a page with the embedded payload first, anchors second.
pub fn parse_page(html: &str) -> PageListing {
    match parse_initial_data(html) {
        Some(ids) => PageListing::Collection(ids),
        None => {
            log::debug!("no usable embedded collection data, falling back to link scraping");
            PageListing::Links(scrape_links(html))
        }
    }
}

/// Identifiers from the first script whose `window.initialData` holds `collection.models`.
///
/// Returns `None` when no script carries such a payload, including when every
/// candidate payload fails to parse.
pub fn parse_initial_data(html: &str) -> Option<Vec<Identifier>> {
    let document = Html::parse_document(html);
    let Ok(scripts) = Selector::parse("script") else { return None };

    for script in document.select(&scripts) {
        let text: String = script.text().collect();
        let Some(start) = text.find(INITIAL_DATA_MARKER) else { continue };

        match parse_payload(&text[start + INITIAL_DATA_MARKER.len()..]) {
            Ok(data) => {
                let Some(collection) = data.get("collection") else { continue };
                let Some(models) = collection.get("models") else { continue };
                return Some(model_ids(models));
            }
            Err(e) => {
                log::debug!("skipping script block: {}", e);
                continue;
            }
        }
    }
    None
}

/// Parses the first JSON value of the text following the marker.
fn parse_payload(after_marker: &str) -> Result<Value, CollectionError> {
    let payload = match after_marker.find(SCRIPT_CLOSE) {
        Some(end) => &after_marker[..end],
        None => after_marker,
    };
    // the assignment is usually followed by `;` and more script, only the object matters
    let mut values = serde_json::Deserializer::from_str(payload.trim_start()).into_iter::<Value>();
    match values.next() {
        Some(value) => Ok(value?),
        // nothing but whitespace, let serde_json report the EOF
        None => Ok(serde_json::from_str(payload)?),
    }
}

fn model_ids(models: &Value) -> Vec<Identifier> {
    models.as_array()
        .map(|entries| entries.iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(Identifier::from)
            .collect())
        .unwrap_or_default()
}

/// Identifiers guessed from site-relative anchors.
///
/// Anchors inside `<article>` elements are used when there are any, all
/// anchors otherwise.
pub fn scrape_links(html: &str) -> BTreeSet<Identifier> {
    let document = Html::parse_document(html);
    let hrefs = |selector: &str| -> Vec<String> {
        match Selector::parse(selector) {
            Ok(sel) => document.select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .map(str::to_string)
                .collect(),
            Err(_) => vec![],
        }
    };

    let mut candidates = hrefs(r#"article a[href^="/"]"#);
    if candidates.is_empty() {
        candidates = hrefs(r#"a[href^="/"]"#);
    }

    candidates.iter()
        .filter_map(|href| link_identifier(href))
        .collect()
}

fn link_identifier(href: &str) -> Option<Identifier> {
    let id = href.strip_prefix('/')?.trim_start_matches('/');
    if id.starts_with('?') || !id.contains('/') {
        return None;
    }
    if EXCLUDED_LINK_PARTS.iter().any(|part| href.contains(part)) {
        return None;
    }
    Some(Identifier::from(id))
}

/// Fetches collection pages through a [`PageSource`] and parses them.
pub struct Extractor {
    source: Box<dyn PageSource>,
}

impl Extractor {
    pub fn new(source: Box<dyn PageSource>) -> Self {
        Self { source }
    }

    pub fn extract(&self, page_url: &str) -> Result<PageListing, CollectionError> {
        let url = validate_url(page_url)?;
        log::info!("Getting collection information: {}", url);
        let html = self.source.get_page(&url)?;
        let listing = parse_page(&html);
        match &listing {
            PageListing::Collection(ids) => log::debug!("embedded payload listed {} entries", ids.len()),
            PageListing::Links(ids) => log::debug!("link scraping found {} candidates", ids.len()),
        }
        Ok(listing)
    }
}
