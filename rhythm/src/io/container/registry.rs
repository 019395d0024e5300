//! Registry of open container handles.
//!
//! Every handle the container layer opens is registered here. Opening a file
//! for writing while the registry holds a handle to it fails with
//! `AlreadyOpen`; `close_all` force-closes every registered handle so a
//! writer can retry. Only handles created through this registry are tracked.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Shared slot holding a handle's file. `None` once closed.
pub(crate) type FileSlot = Arc<Mutex<Option<File>>>;

#[derive(Debug)]
struct OpenEntry {
    path: PathBuf,
    slot: FileSlot,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    open: BTreeMap<u64, OpenEntry>,
}

/// Cloneable handle to a set of open container files.
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently registered handles.
    pub fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    /// True if any registered handle refers to `path`.
    pub fn is_open(&self, path: &Path) -> bool {
        let key = normalize(path);
        self.lock().open.values().any(|entry| entry.path == key)
    }

    /// Paths of all registered handles, in registration order.
    pub fn open_paths(&self) -> Vec<PathBuf> {
        self.lock()
            .open
            .values()
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Force-close every registered handle and forget it. Returns how many
    /// handles were closed.
    pub fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut self.lock().open);
        for entry in drained.values() {
            debug!(path = %entry.path.display(), "force-closing container handle");
            lock_slot(&entry.slot).take();
        }
        drained.len()
    }

    pub(crate) fn register(&self, path: &Path, file: File) -> (u64, FileSlot) {
        let slot: FileSlot = Arc::new(Mutex::new(Some(file)));
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(
            id,
            OpenEntry {
                path: normalize(path),
                slot: Arc::clone(&slot),
            },
        );
        (id, slot)
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.lock().open.remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn lock_slot(slot: &FileSlot) -> MutexGuard<'_, Option<File>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canonical form of `path` for identity checks. Files that do not exist yet
/// are resolved through their parent directory.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
