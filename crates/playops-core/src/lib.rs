//! Core types and utilities for the playops admin platform
//!
//! # Modules
//!
//! - `context`: Context merge helpers and log previews
//! - `error`: Error types and Result alias

pub mod context;
pub mod error;

// Re-exports
pub use context::{json_preview, merge_output};
pub use error::{Error, Result};
