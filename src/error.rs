//! Typed errors for the engine's mutate surface and the outbound transport.

use crate::types::DestinationId;
use thiserror::Error;

/// Rejections from admin-facing engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("gap must be between {min} and {max}, got {value}")]
    GapOutOfRange { value: u32, min: u32, max: u32 },
    #[error("destination {0} is already configured")]
    DuplicateDestination(DestinationId),
    #[error("destination {0} is not configured")]
    UnknownDestination(DestinationId),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// A word that names no known parity or gap mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized {kind} '{value}'")]
pub struct ParseValueError {
    pub kind: &'static str,
    pub value: String,
}

/// Failure of a single send/edit against one destination.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after_secs: Option<u64>,
    },
    #[error("malformed API response: {0}")]
    Malformed(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Status code carried by the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Http(e) => e.status().map(|s| s.as_u16()),
            TransportError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            TransportError::Api {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}
