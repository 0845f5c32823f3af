use reqwest::StatusCode;

/// Page-level failures while turning a collection URL into identifiers.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
  #[error("invalid collection URL {0}")]
  InvalidInput(String),

  #[error("could not access collection page {url}, status code: {status}")]
  Fetch { url: String, status: StatusCode },

  #[error("couldn't get URL via reqwest: {0}")]
  Http(#[from] reqwest::Error),

  /// Only ever produced for a single script block; callers recover from it.
  #[error("embedded collection data is not valid JSON: {0}")]
  Parse(#[from] serde_json::Error),
}
