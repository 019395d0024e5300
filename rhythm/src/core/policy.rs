//! Overwrite and post-write verification rules.

use std::time::{Duration, SystemTime};

use super::types::EntryDecision;

/// Decide how to treat a module's entry given whether it already exists.
pub fn decide_entry(exists: bool, overwrite: bool) -> EntryDecision {
    match (exists, overwrite) {
        (false, _) => EntryDecision::Insert,
        (true, true) => EntryDecision::Overwrite,
        (true, false) => EntryDecision::Skip,
    }
}

/// True if a file claimed as just written was last modified more than
/// `threshold` before `now`. A modification time in the future is not stale.
pub fn is_stale(modified: SystemTime, now: SystemTime, threshold: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > threshold)
        .unwrap_or(false)
}
