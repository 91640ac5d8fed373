//! Common types used across apiaudit

use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Audit level, ordered by how much of a request/response is recorded.
///
/// `None < Metadata < Request < RequestResponse`. The derived `Ord` relies on
/// declaration order, so variants must stay sorted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Level {
    /// Nothing is recorded
    #[default]
    None,
    /// Request metadata only: user, verb, object reference, timestamps
    Metadata,
    /// Metadata plus the request body
    Request,
    /// Metadata plus request and response bodies
    RequestResponse,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Metadata => "Metadata",
            Self::Request => "Request",
            Self::RequestResponse => "RequestResponse",
        }
    }

    /// Mirrors the audit-policy helper of the same name
    pub fn greater_or_equal(self, other: Level) -> bool {
        self >= other
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = AuditError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(Level::None),
            "metadata" => Ok(Level::Metadata),
            "request" => Ok(Level::Request),
            "requestresponse" | "request_response" => Ok(Level::RequestResponse),
            _ => Err(AuditError::InvalidLevel(s.to_string())),
        }
    }
}
