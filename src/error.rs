//! Error types for strategy resolution and rate limiting.
//!
//! Errors fall into three classes:
//!
//! - configuration errors (`NoSuchStrategy`, `DuplicateStrategy`, `Config`,
//!   rule errors), raised while the registry and rules are being set up;
//! - per-request errors (`MissingKeyMaterial`), surfaced to the caller as a
//!   distinct outcome rather than a deny;
//! - transient backing-store errors (`Storage`, `BackingStoreTimeout`),
//!   which the dispatcher resolves locally through the rule's failure policy.

use std::time::Duration;
use thiserror::Error;

use crate::key::LimitMode;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for strategy resolution and rate limiting.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// No strategy is registered under the given capability and name.
    #[error("No {capability} strategy registered under name '{name}'")]
    NoSuchStrategy {
        /// Capability type that was searched.
        capability: &'static str,
        /// Strategy name that was requested.
        name: String,
    },

    /// A strategy with the same capability and name is already registered.
    #[error("A {capability} strategy named '{name}' is already registered")]
    DuplicateStrategy {
        /// Capability type of the colliding registration.
        capability: &'static str,
        /// Colliding strategy name.
        name: String,
    },

    /// The request lacks the data the limiting mode needs.
    #[error("Request has no {missing} required by {mode} limiting mode")]
    MissingKeyMaterial {
        /// Mode of the rule being evaluated.
        mode: LimitMode,
        /// Which piece of key material was absent.
        missing: &'static str,
    },

    /// The backing store did not answer within the configured timeout.
    #[error("Backing store did not respond within {0:?}")]
    BackingStoreTimeout(Duration),

    /// No rule is configured under the given name.
    #[error("No rate limit rule named '{0}'")]
    UnknownRule(String),

    /// Two rules share the same name.
    #[error("Rate limit rule '{0}' is defined more than once")]
    DuplicateRule(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RateLimitError {
    /// Whether this error is a setup-time configuration error.
    ///
    /// Configuration errors must stop rule activation before traffic arrives.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoSuchStrategy { .. }
                | Self::DuplicateStrategy { .. }
                | Self::UnknownRule(_)
                | Self::DuplicateRule(_)
                | Self::Config(_)
        )
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackingStoreTimeout(_) => true,
            Self::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The backend is not reachable.
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::Unavailable(_) => true,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid quota configuration.
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// Invalid rule configuration.
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// Rule name.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Configuration document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Malformed(String),
}
