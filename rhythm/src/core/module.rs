//! Module identity and the accessor contract every processing step implements.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::records::{DataTree, Record};
use crate::error::{StoreError, StoreResult};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("module name pattern"));

/// Validated module identifier.
///
/// Module names key entries in the aggregate documents and form the stem of
/// the per-module data file, so they are restricted to filesystem-safe
/// characters and may not start with a dot or separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        if !NAME_RE.is_match(&name) {
            return Err(StoreError::precondition(format!(
                "module name '{name}' must match {}",
                NAME_RE.as_str()
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named processing step that produces config, run-info and run-data records.
///
/// Accessors return `None` until the module has populated the record; the
/// persistence protocol treats a missing record as a precondition failure.
pub trait Module {
    fn name(&self) -> &ModuleName;

    /// Parameters the module was invoked with.
    fn config(&self) -> Option<&Record>;

    /// Lightweight metadata about what happened during the run.
    fn run_info(&self) -> Option<&Record>;

    /// Bulk numeric output of the run.
    fn run_data(&self) -> Option<&DataTree>;
}
