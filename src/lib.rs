//! Enumerate the models and datasets of a hub collection page and download
//! them in parallel, keeping track of what succeeded across runs.

pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod identifier;
pub mod ledger;
pub mod logging;
pub mod notifiers;

#[cfg(test)]
mod testutil;

pub use coordinator::{Coordinator, FetchSummary, RunOptions};
pub use error::CollectionError;
pub use extractor::{Extractor, PageListing};
pub use identifier::{Identifier, RepoKind};
