//! History persistence.

use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::Result;
use crate::tracing::prelude::*;

use super::History;

/// Loads and saves the history file.
///
/// The on-disk shape is a map of machine id to `{"entries": [...]}`.
/// Saves go through a temporary file and a rename so a crash mid-write
/// never leaves a truncated history behind.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the history, dropping entries that aged out while the
    /// monitor was down. A missing file is an empty history.
    pub fn load(&self, now: OffsetDateTime) -> Result<History> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history file yet");
                return Ok(History::default());
            }
            Err(error) => return Err(error.into()),
        };
        parse(&raw, now)
    }

    pub fn save(&self, history: &History) -> Result<()> {
        let raw = serde_json::to_vec_pretty(history)?;
        write_atomic(&self.path, &raw)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse(raw: &[u8], now: OffsetDateTime) -> Result<History> {
    let mut history: History = serde_json::from_slice(raw)?;
    history.prune(now);
    Ok(history)
}

/// Write a file through a temporary sibling and an atomic rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
