//! Taskdeck Common Library
//!
//! Entity model for the records the harness creates and tears down through
//! the Taskdeck REST API. The harness never owns these records; it only keeps
//! the identifiers the server hands back.

pub mod types;

pub use types::*;

/// Taskdeck harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
