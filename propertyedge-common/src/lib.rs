//! # PropertyEdge Common Library
//!
//! Shared code for the PropertyEdge crates:
//! - Error type
//! - TOML configuration model and loading
//! - Logging initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
