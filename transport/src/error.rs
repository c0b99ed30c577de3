//! Error types for the request transport

use crate::config::ConfigError;
use agora_core::wire::{WireError, WireErrorEnvelope};
use std::fmt;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Code used when an error body could not be parsed
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// A non-2xx response, classified from the server's error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Machine-readable code (`UNKNOWN_ERROR` when the body was unparseable)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// The server wants a second authentication factor
    pub mfa_required: bool,
    /// The server needs the user to pick between several matches
    pub disambiguation_required: bool,
}

impl ApiError {
    /// Classify a response body.
    ///
    /// Bodies that are not a JSON error envelope fall back to a generic
    /// message naming the status.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let envelope = serde_json::from_str::<WireErrorEnvelope>(body).unwrap_or_default();
        let message = envelope
            .error
            .or(envelope.message)
            .filter(|message| !message.trim().is_empty());

        Self {
            status,
            code: envelope
                .code
                .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
            message: message.unwrap_or_else(|| Self::generic_message(status)),
            mfa_required: envelope.mfa_required.unwrap_or(false),
            disambiguation_required: envelope.disambiguation_required.unwrap_or(false),
        }
    }

    /// Fallback message for a status without a usable body
    #[must_use]
    pub fn generic_message(status: u16) -> String {
        format!("Request failed with status {status}")
    }

    /// Status 5xx
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Status 4xx
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }

    /// Whether the server supplied its own message
    #[must_use]
    pub fn has_server_message(&self) -> bool {
        self.message != Self::generic_message(self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, status {})", self.message, self.code, self.status)
    }
}

/// Errors that can occur when talking to the Agora API
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No response was received
    #[error("Request failed: {0}")]
    Network(String),

    /// The client-side timeout elapsed
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-2xx status
    #[error("API error: {0}")]
    Api(ApiError),

    /// A 2xx body could not be decoded
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// The API error, if the server answered
    #[must_use]
    pub const fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(error) => Some(error),
            _ => None,
        }
    }

    /// HTTP status, if the server answered
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api(error) => Some(error.status),
            _ => None,
        }
    }

    /// Whether the server asked for a second authentication factor
    #[must_use]
    pub fn mfa_required(&self) -> bool {
        self.api().is_some_and(|error| error.mfa_required)
    }

    /// Whether the server asked the user to disambiguate
    #[must_use]
    pub fn disambiguation_required(&self) -> bool {
        self.api().is_some_and(|error| error.disambiguation_required)
    }

    /// Message to show the user.
    ///
    /// Validation and conflict failures carry the server's own message;
    /// everything else (server failures, network errors, unparseable bodies)
    /// shows `fallback`.
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Api(error) if error.is_client_error() && error.has_server_message() => {
                error.message.clone()
            },
            _ => fallback.to_string(),
        }
    }
}

impl From<WireError> for TransportError {
    fn from(error: WireError) -> Self {
        Self::ResponseParseFailed(error.to_string())
    }
}

impl From<ConfigError> for TransportError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else if error.is_decode() {
            Self::ResponseParseFailed(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}
