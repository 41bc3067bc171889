//! Core primitives of the workflow state engine.
//!
//! Everything the stores and the workflow layer build on lives here:
//! locking, atomic writes, patch merging, the artifact codec, the ledger
//! gateway and repository, and the pure dependency graph engine.

pub mod codec;
pub mod config;
pub mod error;
pub mod fs_atomic;
pub mod gateway;
pub mod graph;
pub mod lock;
pub mod logging;
pub mod model;
pub mod patch;
pub mod repository;
pub mod time;
