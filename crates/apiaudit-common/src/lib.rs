//! apiaudit Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the apiaudit workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`AuditError`] for values that fail to parse
//! - **Logging**: centralized `tracing` subscriber setup
//! - **Types**: the audit [`Level`](types::Level) shared by policy and events
//!
//! # Example
//!
//! ```no_run
//! use apiaudit_common::logging::{init_logging, LogConfig};
//! use apiaudit_common::types::Level;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let level: Level = "Request".parse()?;
//!     tracing::info!(%level, "audit level configured");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::AuditError;
