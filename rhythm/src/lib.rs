//! Run-artifact persistence for facial-movement analysis modules.
//!
//! Every processing module (ROI selection, point tracking, decomposition, ...)
//! produces up to three artifacts per run: a small config record, a run-info
//! record and a bulk run-data record. This crate stores them in a project
//! layout with deterministic paths and a shared overwrite policy:
//!
//! - **[`core`]**: Pure, deterministic logic (naming rules, record and data
//!   tree types, overwrite decisions, target addressing, mask rasterization).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (aggregate documents, the bulk-data
//!   container, the persistence protocol, project scaffolding).
//!
//! [`rois`] is the ROI-selection module built on top of both.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rois;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{StoreError, StoreResult};
