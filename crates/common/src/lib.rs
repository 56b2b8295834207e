//! Common utilities for the pegvm crates.
//!
//! - [`debug`] - Per-module logging controlled via the `DEBUG` environment variable
//! - [`intern`] - String interning using arena allocation

pub mod debug;
pub mod intern;

pub use debug::{create_logger, Logger};
pub use intern::StringInterner;
