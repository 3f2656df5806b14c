//! # Patent Master
//!
//! A Model Context Protocol (MCP) server for searching and retrieving patents
//! from USPTO Patent Public Search, the USPTO Open Data Portal and the Google
//! Patents public dataset on BigQuery.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`]: Configuration and credential resolution
//! - [`session`]: The ppubs browsing session state machine
//! - [`sources`]: One adapter per upstream behind a shared trait
//! - [`normalize`]: Mapping of upstream payloads into [`models::PatentRecord`]
//! - [`service`]: The facade every tool calls (validation, time bounds, error taxonomy)
//! - [`mcp`]: MCP tool registry and server
//! - [`utils`]: HTTP client, retry and poll loops, input validation

pub mod config;
pub mod mcp;
pub mod models;
pub mod normalize;
pub mod service;
pub mod session;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use models::PatentRecord;
pub use service::{PatentService, ToolError};
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
