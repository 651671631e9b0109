//! Shared error type and configuration for the ODD devtools workspace.

pub mod config;
pub mod error;

pub use error::{Error, Result};
