//! Error types shared by apiaudit crates

use thiserror::Error;

/// Main error type for apiaudit
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Invalid audit level: {0}")]
    InvalidLevel(String),
}
