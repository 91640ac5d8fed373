//! API request auditing server
//!
//! Tower middleware and supporting services that record who did what to
//! which resource for every request an API server handles.
//!
//! # Overview
//!
//! - **Audit pipeline**: level policy, event builder, response capture,
//!   bounded delivery queue and a backend task feeding a sink
//! - **Request info**: resolves verb, scope and resource from API paths
//! - **Configuration**: environment-based configuration management
//! - **Middleware**: CORS and request logging
//!
//! Auditing never fails or meaningfully delays the request it observes: the
//! only wait on the request path is a bounded enqueue, and every audit error
//! is logged and swallowed.
//!
//! # Example
//!
//! ```no_run
//! use apiaudit_server::{config::Config, routes};
//!
//! # fn example(state: routes::AppState) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let app = routes::create_router(state, &config);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;
pub mod request;
pub mod routes;

// Re-export commonly used types
pub use error::{AppError, AppResult};
