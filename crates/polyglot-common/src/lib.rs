//! Shared plumbing for the polyglot crates: configuration, resource
//! fetching, caches and tracing setup.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod perf;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use crate::config::Config;
pub use crate::error::{ConfigError, FetchError};
pub use crate::fetch::{HttpFetcher, MemoryFetcher, ResourceFetcher};
