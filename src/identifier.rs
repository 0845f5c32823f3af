use std::fmt;

const DATASET_SEGMENT: &str = "datasets";

/// The kind of hub repository an identifier points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
  Model,
  Dataset,
}

/// An opaque `namespace/name` or `datasets/namespace/name` string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn kind(&self) -> RepoKind {
    match self.0.split('/').next() {
      Some(DATASET_SEGMENT) => RepoKind::Dataset,
      _ => RepoKind::Model,
    }
  }

  /// Name of the repository on the hub, without the `datasets/` marker.
  pub fn remote_name(&self) -> &str {
    match self.kind() {
      RepoKind::Dataset => match self.0.split_once('/') {
        // a bare `datasets/x` has nothing sensible to strip, keep it whole
        Some((_, rest)) if rest.contains('/') => rest,
        _ => &self.0,
      },
      RepoKind::Model => &self.0,
    }
  }

  /// Directory name for this identifier under the output directory.
  pub fn local_dir_name(&self) -> String {
    self.0.replace('/', "--")
  }
}

impl fmt::Display for Identifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Identifier {
  fn from(s: &str) -> Self {
    Self::new(s)
  }
}

impl From<String> for Identifier {
  fn from(s: String) -> Self {
    Self(s)
  }
}
