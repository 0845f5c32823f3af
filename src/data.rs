use std::time::Duration;

use reqwest::{self, blocking::Client, StatusCode};
use anyhow::{Result, anyhow};
use url::Url;

use crate::error::CollectionError;

/// Browser-like identification, collection pages tend to reject unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub fn handle_retry<T,F>(retries: u8, retry_interval: Duration, closure: F )
-> Result<T>
where F: Fn() -> Result<T> {
  match (closure(), retries) {
    (Ok(r),_) => Ok(r),
    (Err(s),0) => Err(s),
    (Err(e),_) => {
      log::debug!("Error happened ({}) but {} {} left, will retry in {} seconds",
        e,
        retries,
        if retries == 1 {"retry"} else { "retries" },
        retry_interval.as_secs_f64());
      std::thread::sleep(retry_interval);
      handle_retry(retries - 1, retry_interval, closure)
    }
  }
}

pub fn build_client(user_agent: &str, timeout: Option<Duration>) -> Result<Client> {
  let mut builder = Client::builder().user_agent(user_agent);
  if let Some(timeout) = timeout {
    builder = builder.timeout(timeout);
  }
  builder.build().map_err(|e| anyhow!("could not build HTTP client: {}", e))
}

/// Where collection page markup comes from.
pub trait PageSource: Send + Sync {
  fn get_page(&self, url: &Url) -> Result<String, CollectionError>;
}

/// Fetches pages over HTTP with a single GET, no retries.
pub struct HttpPageSource {
  client: Client,
}

impl HttpPageSource {
  pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
    Ok(Self { client: build_client(user_agent, timeout)? })
  }
}

impl PageSource for HttpPageSource {
  fn get_page(&self, url: &Url) -> Result<String, CollectionError> {
    let res = self.client.get(url.clone()).send()?;
    if res.status() != StatusCode::OK {
      return Err(CollectionError::Fetch { url: url.to_string(), status: res.status() });
    }
    Ok(res.text()?)
  }
}
