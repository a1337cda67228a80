//! Infrastructure - configuration, metrics, and errors
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `error` - Request-level error taxonomy

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use metrics::Metrics;
