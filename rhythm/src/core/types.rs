//! Shared deterministic types for the persistence protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a single save call. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOutcome {
    /// The entry or file did not exist and was written.
    Written,
    /// An existing entry or file was replaced.
    Overwritten,
    /// An entry or file existed and overwrite was disabled; nothing was written.
    Skipped,
}

impl SaveOutcome {
    pub fn wrote(self) -> bool {
        !matches!(self, Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Overwritten => "overwritten",
            Self::Skipped => "skipped",
        }
    }
}

/// What to do with a module's entry in an aggregate document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Insert,
    Overwrite,
    Skip,
}

impl From<EntryDecision> for SaveOutcome {
    fn from(decision: EntryDecision) -> Self {
        match decision {
            EntryDecision::Insert => Self::Written,
            EntryDecision::Overwrite => Self::Overwritten,
            EntryDecision::Skip => Self::Skipped,
        }
    }
}

/// User-visible notice level. Fatal errors are always reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Verbosity {
    Silent,
    #[default]
    Warnings,
    All,
}

impl Verbosity {
    pub fn warnings(self) -> bool {
        self >= Self::Warnings
    }

    pub fn all(self) -> bool {
        self >= Self::All
    }
}

impl TryFrom<u8> for Verbosity {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Silent),
            1 => Ok(Self::Warnings),
            2 => Ok(Self::All),
            other => Err(format!("verbosity must be 0, 1 or 2 (got {other})")),
        }
    }
}

impl From<Verbosity> for u8 {
    fn from(level: Verbosity) -> Self {
        match level {
            Verbosity::Silent => 0,
            Verbosity::Warnings => 1,
            Verbosity::All => 2,
        }
    }
}

/// Per-call knobs for the save operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Replace an existing entry or file instead of skipping.
    pub overwrite: bool,
    /// Compress each array in the run-data container.
    pub use_compression: bool,
    /// zlib level (0..=9) used when compression is on.
    pub compression_level: u32,
    /// Keep insertion order of run-data keys; otherwise keys are sorted.
    pub track_order: bool,
    pub verbosity: Verbosity,
    /// A freshly written data file older than this triggers a warning.
    pub stale_after: Duration,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            use_compression: true,
            compression_level: 4,
            track_order: true,
            verbosity: Verbosity::Warnings,
            stale_after: Duration::from_secs(1),
        }
    }
}
