//! Aggregate run-info document (`run_info.json`).

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::records::Record;
use crate::error::{StoreError, StoreResult};

/// Load the run-info document from disk.
pub fn load_run_info(path: &Path) -> StoreResult<Record> {
    debug!(path = %path.display(), "loading run info");
    let contents = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    let doc: Record = serde_json::from_str(&contents).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(entries = doc.len(), "run info loaded");
    Ok(doc)
}

/// Atomically write the run-info document (temp file + rename).
pub fn write_run_info(path: &Path, doc: &Record) -> StoreResult<()> {
    debug!(path = %path.display(), entries = doc.len(), "writing run info");
    let mut buf = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    buf.push('\n');
    super::write_atomic(path, &buf, "json.tmp")
}
