//! Utility modules shared across the tool.

pub mod envsubst;
pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{GsbtError, Result};
