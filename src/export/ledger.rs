//! Export Ledger
//!
//! Single-writer bookkeeping for the export configuration files. One lock
//! serialises every append, every removal and the Export_Id counter, so two
//! concurrent exports never interleave their writes and the export that takes
//! the lock first receives the lower id and lands earlier in the file.
//!
//! The counter is recovered lazily on first allocation by scanning the
//! configuration file for the highest `Export_Id = N;` already present. The
//! scan is textual: commented-out or malformed blocks count too, and an id
//! that does not fit in a `u32` fails recovery. Removal is a
//! literal substring replacement, so content that is a substring of another
//! entry would take that text with it.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const EXPORT_ID_PATTERN: &str = r"Export_Id = ([0-9]+);";

#[derive(Debug, Default)]
struct LedgerState {
    /// Last Export_Id handed out
    last_export_id: u32,
    /// Whether the counter has been recovered from disk
    recovered: bool,
}

/// Lock-guarded owner of export configuration mutation
#[derive(Debug, Default)]
pub struct ExportLedger {
    state: Mutex<LedgerState>,
}

impl ExportLedger {
    /// Create a new ledger
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `content` to `file` and flush it to disk
    pub fn append(&self, file: &Path, content: &str) -> Result<()> {
        let _state = self.state.lock();
        append_to_file(file, content)
    }

    /// Remove every literal occurrence of `content` from `file`
    pub fn remove(&self, file: &Path, content: &str) -> Result<()> {
        let _state = self.state.lock();

        let current =
            fs::read_to_string(file).map_err(|e| Error::export_config(file, e))?;
        let occurrences = current.matches(content).count();
        let updated = current.replace(content, "");
        fs::write(file, updated).map_err(|e| Error::export_config(file, e))?;

        debug!("Removed {} occurrence(s) from {}", occurrences, file.display());
        Ok(())
    }

    /// Hand out the next Export_Id, recovering the counter from `file` on first use
    pub fn allocate_export_id(&self, file: &Path) -> Result<u32> {
        let mut state = self.state.lock();
        next_export_id(&mut state, file)
    }

    /// Allocate an Export_Id and append the content rendered for it, under one
    /// lock acquisition
    pub fn append_with_export_id<F>(&self, file: &Path, render: F) -> Result<(u32, String)>
    where
        F: FnOnce(u32) -> String,
    {
        let mut state = self.state.lock();
        let export_id = next_export_id(&mut state, file)?;
        let content = render(export_id);
        append_to_file(file, &content)?;

        debug!("Appended Export_Id {} to {}", export_id, file.display());
        Ok((export_id, content))
    }
}

fn next_export_id(state: &mut LedgerState, file: &Path) -> Result<u32> {
    if !state.recovered {
        let existing = fs::read_to_string(file).map_err(|e| Error::export_config(file, e))?;
        let max = max_export_id(file, &existing)?;
        state.last_export_id = state.last_export_id.max(max);
        state.recovered = true;

        info!(
            "Recovered Export_Id counter from {}: highest existing id {}",
            file.display(),
            max
        );
    }

    state.last_export_id = state.last_export_id.checked_add(1).ok_or_else(|| {
        Error::export_config(file, "Export_Id counter exhausted")
    })?;
    Ok(state.last_export_id)
}

/// Highest Export_Id mentioned anywhere in `config` (read from `file`), 0 if none
fn max_export_id(file: &Path, config: &str) -> Result<u32> {
    let pattern = Regex::new(EXPORT_ID_PATTERN)
        .map_err(|e| Error::Internal(format!("Export_Id pattern: {}", e)))?;

    let max = pattern
        .captures_iter(config)
        .map(|caps| {
            caps[1].parse::<u32>().map_err(|e| {
                Error::export_config(file, format!("Export_Id {}: {}", &caps[1], e))
            })
        })
        .try_fold(0, |max, id| id.map(|id| max.max(id)));
    max
}

fn append_to_file(file: &Path, content: &str) -> Result<()> {
    let mut handle = OpenOptions::new()
        .append(true)
        .open(file)
        .map_err(|e| Error::export_config(file, e))?;

    handle
        .write_all(content.as_bytes())
        .map_err(|e| Error::export_config(file, e))?;
    handle.sync_all().map_err(|e| Error::export_config(file, e))?;

    Ok(())
}
