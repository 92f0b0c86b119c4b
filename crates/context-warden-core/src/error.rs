//! Error types for context-warden-core.
//!
//! This module defines the central error type [`WardenError`] used throughout
//! the crate, along with the [`WardenResult<T>`] type alias.
//!
//! Most runtime conditions in this crate are *not* errors: malformed input is
//! recovered with neutral defaults, compression failures fall back to the
//! original snapshot, and exhausted recovery attempts produce a failure
//! *result*. `WardenError` is reserved for genuine misuse, primarily invalid
//! configuration detected at construction time.

use thiserror::Error;

/// Top-level error type for context-warden-core operations.
///
/// # Examples
///
/// ```rust
/// use context_warden_core::WardenError;
///
/// let err = WardenError::InvalidConfig {
///     field: "zone.boundaries".to_string(),
///     message: "cutoffs must be strictly decreasing".to_string(),
/// };
/// assert!(err.to_string().contains("zone.boundaries"));
/// ```
#[derive(Debug, Error)]
pub enum WardenError {
    /// A configuration value failed validation constraints.
    ///
    /// Returned from `validate()` on the config types when monotonicity or
    /// range invariants are violated (e.g. zone cutoffs out of order, tier
    /// ratios not increasing, a weight set that does not sum to 1).
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig {
        /// Dotted path of the offending field
        field: String,
        /// Description of the violated invariant
        message: String,
    },

    /// Error loading configuration from file or environment.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error during serialization or deserialization.
    ///
    /// Surfaces only from operator-facing helpers (diagnostics export);
    /// snapshot ingestion never produces this, it defaults instead.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An unexpected internal error occurred.
    ///
    /// Indicates an invariant violation inside the control loop. These are
    /// bugs and should be reported.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        WardenError::ConfigError(err.to_string())
    }
}

/// Result type alias for warden operations.
pub type WardenResult<T> = Result<T, WardenError>;
