//! Error types for cacher operations

use thiserror::Error;

/// Failures talking to the key-value store.
///
/// These are surfaced to callers unchanged; the cache never retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {reason}")]
    Connection { reason: String },

    #[error("Store request timed out: {reason}")]
    Timeout { reason: String },

    #[error("Store command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },
}

impl StoreError {
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is transient from the caller's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Encoding and decoding failures for stored records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Stored record is missing field {field}")]
    MissingField { field: String },

    #[error("Compression failed: {reason}")]
    Compress { reason: String },

    #[error("Decompression failed: {reason}")]
    Decompress { reason: String },

    #[error("Record encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Record decoding failed: {reason}")]
    Decode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all cacher errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacherError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacherError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Codec(_) | Self::Config(_) => false,
        }
    }
}

/// Result type alias for cacher operations.
pub type CacherResult<T> = Result<T, CacherError>;

/// Result type alias for raw store round trips.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
