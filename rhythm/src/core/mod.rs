//! Deterministic, pure logic shared by the persistence protocol.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod module;
pub mod policy;
pub mod polygon;
pub mod records;
pub mod target;
pub mod types;
