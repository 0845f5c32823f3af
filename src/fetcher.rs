//! Snapshot fetching: pulling every file of one hub repository into a local directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use regex::Regex;
use url::Url;

use crate::config::Config;
use crate::data;
use crate::identifier::{Identifier, RepoKind};

/// Hub cache layout kept inside each model directory while it downloads.
const STAGING_DIR: &str = ".hfsnap-staging";

/// Everything a fetcher needs to download one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub remote_name: String,
    pub kind: RepoKind,
    pub local_dir: PathBuf,
    pub token: Option<String>,
    /// Passed through untouched; what resuming means is up to the fetcher.
    pub resume: bool,
}

impl FetchRequest {
    pub fn for_identifier(id: &Identifier, output_dir: &Path, token: Option<String>, resume: bool) -> Self {
        Self {
            remote_name: id.remote_name().to_string(),
            kind: id.kind(),
            local_dir: output_dir.join(id.local_dir_name()),
            token,
            resume,
        }
    }
}

pub trait SnapshotFetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<()>;
}

impl<F: SnapshotFetcher + ?Sized> SnapshotFetcher for Arc<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<()> {
        (**self).fetch(request)
    }
}

/// Downloads whole repositories through the `hf_hub` client.
///
/// Files land in the hub cache layout under `<local_dir>/.hfsnap-staging`
/// first and are then linked (or copied) to `<local_dir>/<rfilename>`. The
/// staging area is dropped once the repository is complete. On failure it is
/// left behind so a `resume` run can pick up what was already transferred.
pub struct HubFetcher {
    endpoint: String,
    revision: String,
    retries: u8,
    retry_interval: Duration,
    ignore: Vec<Regex>,
}

impl HubFetcher {
    pub fn from_config(config: &Config) -> Result<Self> {
        Url::parse(&config.endpoint).map_err(|e| anyhow!("invalid endpoint {}: {}", config.endpoint, e))?;
        let ignore = config.ignore_patterns.iter()
            .map(|p| glob_to_regex(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            revision: config.revision.clone(),
            retries: config.retries,
            retry_interval: config.retry_interval(),
            ignore,
        })
    }

    fn repo_spec(&self, request: &FetchRequest) -> Repo {
        let repo_type = match request.kind {
            RepoKind::Model => RepoType::Model,
            RepoKind::Dataset => RepoType::Dataset,
        };
        Repo::with_revision(request.remote_name.clone(), repo_type, self.revision.clone())
    }

    fn repo(&self, request: &FetchRequest, staging: &Path) -> Result<ApiRepo> {
        let mut builder = ApiBuilder::new()
            .with_endpoint(self.endpoint.clone())
            .with_cache_dir(staging.to_path_buf())
            .with_progress(false);
        // without an explicit token the client keeps the one saved by `huggingface-cli login`
        if let Some(token) = &request.token {
            builder = builder.with_token(Some(token.clone()));
        }
        let api = builder.build()
            .map_err(|e| anyhow!("could not build hub client for {}: {}", request.remote_name, e))?;
        Ok(api.repo(self.repo_spec(request)))
    }

    fn is_ignored(&self, rfilename: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(rfilename))
    }

    /// Repository file names minus the ignored ones.
    fn wanted_files(&self, repo: &ApiRepo, request: &FetchRequest) -> Result<Vec<String>> {
        let info = data::handle_retry(self.retries, self.retry_interval, || {
            repo.info().map_err(|e| anyhow!("couldn't list files of {}: {}", request.remote_name, e))
        })?;
        log::debug!("{} lists {} files", request.remote_name, info.siblings.len());
        Ok(info.siblings.into_iter()
            .map(|s| s.rfilename)
            .filter(|f| {
                let ignored = self.is_ignored(f);
                if ignored {
                    log::debug!("ignoring {}", f);
                }
                !ignored
            })
            .collect())
    }
}

impl SnapshotFetcher for HubFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<()> {
        fs::create_dir_all(&request.local_dir)
            .map_err(|e| anyhow!("could not create {}: {}", request.local_dir.display(), e))?;
        let staging = prepare_staging(&request.local_dir, request.resume)?;
        let repo = self.repo(request, &staging)?;

        for rfilename in self.wanted_files(&repo, request)? {
            let target = local_path(&request.local_dir, &rfilename)?;
            if target.exists() {
                log::debug!("{} already present, skipping", target.display());
                continue;
            }
            let cached = data::handle_retry(self.retries, self.retry_interval, || {
                repo.get(&rfilename)
                    .map_err(|e| anyhow!("download of {} from {} failed: {}", rfilename, request.remote_name, e))
            })?;
            place(&cached, &target)?;
        }

        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|e| anyhow!("could not clean up {}: {}", staging.display(), e))?;
        }
        Ok(())
    }
}

/// Staging directory for `local_dir`. Without `resume`, leftovers of an earlier
/// interrupted run are thrown away so every file starts from scratch.
fn prepare_staging(local_dir: &Path, resume: bool) -> Result<PathBuf> {
    let staging = local_dir.join(STAGING_DIR);
    if !resume && staging.exists() {
        log::debug!("discarding earlier partial download in {}", staging.display());
        fs::remove_dir_all(&staging)
            .map_err(|e| anyhow!("could not remove {}: {}", staging.display(), e))?;
    }
    Ok(staging)
}

/// Puts the cached file at `target`. The cache hands out symlinks into its blob
/// store, so the blob itself is linked, falling back to a copy across filesystems.
fn place(cached: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| anyhow!("could not create {}: {}", parent.display(), e))?;
    }
    let blob = fs::canonicalize(cached).map_err(|e| anyhow!("could not resolve {}: {}", cached.display(), e))?;
    if fs::hard_link(&blob, target).is_err() {
        fs::copy(&blob, target)
            .map_err(|e| anyhow!("could not copy {} to {}: {}", blob.display(), target.display(), e))?;
    }
    Ok(())
}

/// Joins a repository file name onto `dir`, refusing names that would escape it.
fn local_path(dir: &Path, rfilename: &str) -> Result<PathBuf> {
    let relative = Path::new(rfilename);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("refusing to write repository file {} outside {}", rfilename, dir.display());
    }
    Ok(dir.join(relative))
}

/// Shell-style pattern where `*` matches any run of characters and `?` a single one.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|_| anyhow!("error creating regex from pattern: {}", pattern))
}
