//! Side-effecting operations: aggregate documents, data containers, the
//! persistence protocol and project scaffolding.

pub mod config_doc;
pub mod container;
pub mod init;
pub mod persist;
pub mod run_info;
pub mod settings;

use std::fs;
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Write `contents` to a sibling temp file, then rename it over `path`.
/// Missing parent directories are created.
pub(crate) fn write_atomic(path: &Path, contents: &str, tmp_extension: &str) -> StoreResult<()> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::precondition(format!("path missing parent {}", path.display()))
    })?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }
    let tmp_path = path.with_extension(tmp_extension);
    fs::write(&tmp_path, contents).map_err(|err| StoreError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| StoreError::io(path, err))
}
