//! # Wayfarer Common
//!
//! Shared logging configuration for the Wayfarer offline worker crates.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
