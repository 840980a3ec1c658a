//! Error types for session store operations
//!
//! Store failures are categorized so the reconciler can report them with
//! enough context to diagnose. None of them is retried.

use thiserror::Error;

/// Errors that can occur when talking to the backing store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Transport failures (connection refused, DNS, timeout)
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// The store rejected the credentials
    #[error("Authentication error: {message}")]
    Auth {
        /// Error message
        message: String,
    },

    /// The store answered with a non-success status
    #[error("Request rejected ({status}): {message}")]
    Request {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body could not be decoded
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Missing or invalid connection settings
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// The store refused the operation for another reason
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Error message
        message: String,
    },
}

impl StoreError {
    /// Creates a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates a request error for the given status
    pub fn request(status: u16, message: impl Into<String>) -> Self {
        Self::Request {
            status,
            message: message.into(),
        }
    }

    /// Creates a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the credentials were rejected
    pub fn is_auth_error(&self) -> bool {
        matches!(self, StoreError::Auth { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::serialization(format!("Failed to decode response: {}", err))
        } else if err.is_timeout() {
            Self::network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {}", err))
        } else if let Some(status) = err.status() {
            Self::request(status.as_u16(), err.to_string())
        } else {
            Self::network(format!("Request failed: {}", err))
        }
    }
}
