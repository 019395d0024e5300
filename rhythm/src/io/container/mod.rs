//! Hierarchical bulk-data container files (`.frd`).
//!
//! A container stores a [`DataTree`] in one file. All file handles go through
//! a [`HandleRegistry`] so that a writer can detect (and recover from) a
//! handle to the same file left open elsewhere in the process.

pub mod format;
pub mod registry;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::core::records::DataTree;
pub use format::EncodeOptions;
use registry::{FileSlot, lock_slot};
pub use registry::HandleRegistry;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("unable to open {}: file is already open", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("container handle for {} has been closed", .0.display())]
    Closed(PathBuf),

    #[error("unable to create {}: file already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("corrupt container {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: format::FormatError,
    },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ContainerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How an existing file at the target path is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate and replace.
    Truncate,
    /// Fail with `AlreadyExists` if the file is present.
    CreateNew,
}

/// An open, registered container file.
///
/// The handle is closed by [`ContainerHandle::close`], on drop, or by
/// [`HandleRegistry::close_all`]; reads after a forced close fail with
/// [`ContainerError::Closed`].
#[derive(Debug)]
pub struct ContainerHandle {
    id: u64,
    path: PathBuf,
    slot: FileSlot,
    registry: HandleRegistry,
}

impl ContainerHandle {
    /// Open an existing container for reading.
    pub fn open(path: &Path, registry: &HandleRegistry) -> Result<Self, ContainerError> {
        let file = File::open(path).map_err(|err| ContainerError::io(path, err))?;
        Ok(Self::register(path, file, registry))
    }

    fn register(path: &Path, file: File, registry: &HandleRegistry) -> Self {
        let (id, slot) = registry.register(path, file);
        debug!(path = %path.display(), id, "container handle opened");
        Self {
            id,
            path: path.to_path_buf(),
            slot,
            registry: registry.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        lock_slot(&self.slot).is_none()
    }

    /// Read and decode the whole container.
    pub fn read_tree(&self) -> Result<DataTree, ContainerError> {
        let mut guard = lock_slot(&self.slot);
        let file = guard
            .as_mut()
            .ok_or_else(|| ContainerError::Closed(self.path.clone()))?;
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut bytes))
            .map_err(|err| ContainerError::io(&self.path, err))?;
        format::decode(&bytes).map_err(|source| ContainerError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), ContainerError> {
        let mut guard = lock_slot(&self.slot);
        let file = guard
            .as_mut()
            .ok_or_else(|| ContainerError::Closed(self.path.clone()))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|err| ContainerError::io(&self.path, err))
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        lock_slot(&self.slot).take();
        self.registry.unregister(self.id);
    }
}

/// Write `tree` to `path`.
///
/// Fails with [`ContainerError::AlreadyOpen`] if `registry` holds any handle
/// to `path`. The parent directory must exist.
pub fn write_container(
    path: &Path,
    tree: &DataTree,
    options: EncodeOptions,
    mode: WriteMode,
    registry: &HandleRegistry,
) -> Result<(), ContainerError> {
    if registry.is_open(path) {
        return Err(ContainerError::AlreadyOpen(path.to_path_buf()));
    }
    let bytes = format::encode(tree, options).map_err(|source| ContainerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let mut open = OpenOptions::new();
    open.write(true);
    match mode {
        WriteMode::Truncate => open.create(true).truncate(true),
        WriteMode::CreateNew => open.create_new(true),
    };
    let file = open.open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::AlreadyExists => ContainerError::AlreadyExists(path.to_path_buf()),
        _ => ContainerError::io(path, err),
    })?;

    let handle = ContainerHandle::register(path, file, registry);
    handle.write_all(&bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "container written");
    Ok(())
}

/// Open, read and close a container.
pub fn read_container(path: &Path, registry: &HandleRegistry) -> Result<DataTree, ContainerError> {
    ContainerHandle::open(path, registry)?.read_tree()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn options() -> EncodeOptions {
        EncodeOptions {
            compression: Some(4),
            track_order: true,
        }
    }

    fn tree() -> DataTree {
        [("mask", Array2::from_elem((4, 4), true))].into_iter().collect()
    }

    #[test]
    fn write_then_read_round_trips_and_releases_handles() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let registry = HandleRegistry::new();

        write_container(&path, &tree(), options(), WriteMode::Truncate, &registry).expect("write");
        assert_eq!(registry.open_count(), 0);

        let loaded = read_container(&path, &registry).expect("read");
        assert_eq!(loaded, tree());
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn write_refuses_while_a_handle_is_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let registry = HandleRegistry::new();
        write_container(&path, &tree(), options(), WriteMode::Truncate, &registry).expect("write");

        let reader = ContainerHandle::open(&path, &registry).expect("open");
        let err = write_container(&path, &tree(), options(), WriteMode::Truncate, &registry)
            .unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyOpen(_)));
        assert!(err.to_string().contains("already open"));

        reader.close();
        write_container(&path, &tree(), options(), WriteMode::Truncate, &registry)
            .expect("write after close");
    }

    #[test]
    fn forced_close_invalidates_outstanding_handles() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let registry = HandleRegistry::new();
        write_container(&path, &tree(), options(), WriteMode::Truncate, &registry).expect("write");

        let reader = ContainerHandle::open(&path, &registry).expect("open");
        assert_eq!(registry.close_all(), 1);
        assert!(reader.is_closed());
        assert!(matches!(reader.read_tree(), Err(ContainerError::Closed(_))));
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let registry = HandleRegistry::new();
        write_container(&path, &tree(), options(), WriteMode::CreateNew, &registry).expect("first");

        let err = write_container(&path, &tree(), options(), WriteMode::CreateNew, &registry)
            .unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyExists(_)));
    }

    #[test]
    fn reading_garbage_reports_corruption() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        std::fs::write(&path, b"not a container").expect("write");

        let err = read_container(&path, &HandleRegistry::new()).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt { .. }));
    }
}
