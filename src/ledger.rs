use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::io::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::identifier::Identifier;

pub const SUCCESS_LOG: &str = "successful_downloads.txt";
pub const FAILURE_LOG: &str = "failed_downloads.txt";

/// Reads one identifier per line, ignoring blank lines. A missing file is an empty set.
pub fn read_lines(path: &Path) -> Result<BTreeSet<Identifier>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let contents = fs::read_to_string(path).map_err(|e| anyhow!("could not read file {}: {}", path.display(), e))?;
    Ok(contents.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Identifier::from)
        .collect())
}

pub fn append_lines<'a>(path: &Path, ids: impl IntoIterator<Item = &'a Identifier>) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).create(true).append(true).open(path)
        .map_err(|_| anyhow!("could not open file {} for writing", path.display()))?;
    write_ids(&file, path, ids)
}

pub fn write_lines<'a>(path: &Path, ids: impl IntoIterator<Item = &'a Identifier>) -> Result<()> {
    let file = fs::File::create(path).map_err(|_| anyhow!("could not open file {} for writing", path.display()))?;
    write_ids(&file, path, ids)
}

fn write_ids<'a>(mut file: &fs::File, path: &Path, ids: impl IntoIterator<Item = &'a Identifier>) -> Result<()> {
    for id in ids {
        writeln!(file, "{}", id).map_err(|_| anyhow!("could not write to file {}", path.display()))?;
    }
    file.flush().map_err(|_| anyhow!("could not write to file {}", path.display()))
}

/// The two download records kept in an output directory across runs.
///
/// The success record only ever grows; the failure record is replaced by
/// the failures of the latest run.
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn success_path(&self) -> PathBuf {
        self.dir.join(SUCCESS_LOG)
    }

    pub fn failure_path(&self) -> PathBuf {
        self.dir.join(FAILURE_LOG)
    }

    pub fn load_succeeded(&self) -> Result<BTreeSet<Identifier>> {
        read_lines(&self.success_path())
    }

    pub fn load_failed(&self) -> Result<BTreeSet<Identifier>> {
        read_lines(&self.failure_path())
    }

    pub fn record_succeeded<'a>(&self, ids: impl IntoIterator<Item = &'a Identifier>) -> Result<()> {
        append_lines(&self.success_path(), ids)
    }

    pub fn replace_failed<'a>(&self, ids: impl IntoIterator<Item = &'a Identifier>) -> Result<()> {
        write_lines(&self.failure_path(), ids)
    }
}
