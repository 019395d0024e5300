//! Aggregate project config document (`config.yaml`).
//!
//! The document is a YAML mapping keyed by section or module name. Key order
//! is preserved across load and write since later tooling reads the document
//! as a provenance trail.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::core::records::Record;
use crate::error::{StoreError, StoreResult};

pub const GENERAL_KEY: &str = "general";
pub const DATE_MODIFIED_KEY: &str = "date_modified";
pub const PATHS_KEY: &str = "paths";
pub const PROJECT_KEY: &str = "project";
pub const RUN_INFO_KEY: &str = "run_info";

/// Timestamp layout used for `general.date_modified`.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Load `config.yaml` as an ordered mapping. An empty file is an empty mapping.
pub fn load_config(path: &Path) -> StoreResult<Mapping> {
    debug!(path = %path.display(), "loading config document");
    let contents = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    if contents.trim().is_empty() {
        return Ok(Mapping::new());
    }
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically write the document (temp file + rename), keeping key order.
pub fn write_config(path: &Path, doc: &Mapping) -> StoreResult<()> {
    debug!(path = %path.display(), entries = doc.len(), "writing config document");
    let buf = serde_yaml::to_string(doc).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    super::write_atomic(path, &buf, "yaml.tmp")
}

/// `paths.project`, if registered.
pub fn project_root(doc: &Mapping) -> Option<PathBuf> {
    path_field(doc, PROJECT_KEY)
}

/// `paths.run_info`, if registered.
pub fn run_info_path(doc: &Mapping) -> Option<PathBuf> {
    path_field(doc, RUN_INFO_KEY)
}

fn path_field(doc: &Mapping, key: &str) -> Option<PathBuf> {
    doc.get(PATHS_KEY)
        .and_then(Value::as_mapping)
        .and_then(|paths| paths.get(key))
        .and_then(Value::as_str)
        .map(PathBuf::from)
}

pub fn has_entry(doc: &Mapping, name: &str) -> bool {
    doc.contains_key(name)
}

/// Insert or replace a top-level entry. A replaced entry keeps its position.
pub fn set_entry(doc: &mut Mapping, name: &str, record: &Record, path: &Path) -> StoreResult<()> {
    let value = serde_yaml::to_value(record).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    doc.insert(Value::from(name), value);
    Ok(())
}

/// Set `general.date_modified`, creating the `general` section if missing.
pub fn touch_date_modified(doc: &mut Mapping, timestamp: &str) -> StoreResult<()> {
    let general = doc
        .entry(Value::from(GENERAL_KEY))
        .or_insert(Value::Mapping(Mapping::new()));
    if general.is_null() {
        *general = Value::Mapping(Mapping::new());
    }
    let general = general.as_mapping_mut().ok_or_else(|| {
        StoreError::precondition(format!("config field '{GENERAL_KEY}' must be a mapping"))
    })?;
    general.insert(Value::from(DATE_MODIFIED_KEY), Value::from(timestamp));
    Ok(())
}

/// Current local time in [`DATE_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}
