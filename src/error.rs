//! Error types for the bridge.
//!
//! `BridgeError` covers everything that can go wrong inside the crate. At the
//! Dispatch Client boundary it is turned into a [`CanonicalError`] so callers
//! only ever see the canonical taxonomy.

use thiserror::Error;

use crate::providers::ProviderKind;
use crate::translate::errors::{normalize, CanonicalError, ErrorType, RawError};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Convert into the canonical taxonomy on behalf of `provider`.
    pub fn into_canonical(self, provider: ProviderKind) -> CanonicalError {
        match self {
            Self::Config { message } => {
                CanonicalError::invalid_request(message, provider.as_str()).with_code("config_error")
            }
            Self::Translation { message } => CanonicalError::invalid_request(message, provider.as_str())
                .with_code("translation_error"),
            Self::Http(err) => normalize(RawError::from(err), provider),
            Self::Json(err) => CanonicalError::new(
                ErrorType::ApiError,
                format!("Failed to parse provider payload: {err}"),
                502,
                provider.as_str(),
            ),
            other => normalize(RawError::Message(other.to_string()), provider),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
