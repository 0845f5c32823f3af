use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde::Deserialize;
use anyhow::{anyhow, Result};

use crate::data::BROWSER_USER_AGENT;
use crate::notifiers::{self, Notifier, NotifierChain};

pub const DEFAULT_COLLECTION_URL: &str = "https://huggingface.co/collections/facebook/sparsh-67167ce57566196a4526c328";
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub notifier_type: String,
    pub token: Option<String>,
    pub chat_id: Option<String>,
}

/// Settings read from the optional YAML file; every key may be omitted.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(deserialize_with = "optional_duration_parser")]
    #[serde(default)]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub retries: u8,
    #[serde(deserialize_with = "optional_duration_parser")]
    #[serde(default)]
    pub retry_interval: Option<Duration>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub notifiers: Vec<NotifierEntry>,
}

fn default_user_agent() -> String { BROWSER_USER_AGENT.to_string() }
fn default_endpoint() -> String { DEFAULT_ENDPOINT.to_string() }
fn default_revision() -> String { DEFAULT_REVISION.to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            endpoint: default_endpoint(),
            revision: default_revision(),
            request_timeout: None,
            retries: 0,
            retry_interval: None,
            ignore_patterns: vec![],
            notifiers: vec![],
        }
    }
}

impl Config {
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let file = File::open(file_path).map_err(|e| anyhow!("could not open config file {}: {}", file_path.display(), e))?;
        serde_yaml::from_reader(BufReader::new(file))
            .map_err(|e| anyhow!("could not parse config {} correctly: {}", file_path.display(), e))
    }

    /// Loads `path` when given, the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                log::debug!("loading config file {}", p.display());
                Self::from_file(p)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval.unwrap_or(Duration::new(1,0))
    }

    /// `console` first, then whatever notifiers the file configures.
    pub fn build_notifier(&self, console: Box<dyn Notifier>) -> Result<Box<dyn Notifier>> {
        let mut chain = NotifierChain::new().chain_with(console);
        for n in &self.notifiers {
            let notifier: Box<dyn Notifier> = match n.notifier_type.as_ref() {
                "print" => Box::new(notifiers::PrintNotifier::new()),
                "log" => Box::new(notifiers::LogNotifier::new()),
                "telegram" => match (&n.token, &n.chat_id) {
                    (Some(token), Some(chat_id)) => Box::new(notifiers::TelegramNotifier::new(
                        token.clone(),
                        chat_id.parse().map_err(|_| anyhow!("[{}] invalid chat id", n.name))?,
                    )),
                    (None, None) => Box::new(notifiers::TelegramNotifier::from_env()
                        .map_err(|e| anyhow!("[{}] {}", n.name, e))?),
                    _ => return Err(anyhow!("[{}] telegram notifier needs both token and chat_id", n.name)),
                },
                other => return Err(anyhow!("[{}] invalid notifier type found: {}", n.name, other)),
            };
            chain = chain.chain_with(notifier);
        }
        Ok(Box::new(chain))
    }
}

fn optional_duration_parser<'de, D>(deserializer: D) -> Result<Option<std::time::Duration>, D::Error>
where D: serde::Deserializer<'de> {
    let buf = String::deserialize(deserializer)?;
    Ok(Some(parse_duration::parse(&buf).map_err(serde::de::Error::custom)?))
}
