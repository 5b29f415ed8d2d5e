//! Error types for PostPilot Billing
//!
//! This module provides the error type hierarchy using `thiserror` for
//! proper error handling across all components.

use thiserror::Error;

/// The main error type for PostPilot Billing operations
///
/// Operations inside the pipeline return the specific sub-enum; this type
/// is the crate-wide `Result` error that the binary and library consumers
/// propagate with `?`.
#[derive(Error, Debug)]
pub enum Error {
    /// Webhook intake errors (signature, payload, queueing)
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Idempotency storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (socket bind, serve loop)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Webhook intake and verification errors
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Request carried no signature header
    #[error("Missing signature header")]
    MissingSignature,

    /// Signature header present but not parseable
    #[error("Malformed signature header: {0}")]
    MalformedSignature(String),

    /// Signature did not match the payload
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// Signed timestamp outside the tolerance window
    #[error("Signed timestamp outside tolerance window ({age_secs}s old)")]
    StaleTimestamp {
        /// Age of the signed timestamp in seconds (negative if in the future)
        age_secs: i64,
    },

    /// Payload could not be parsed into an event envelope
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Event could not be handed to the background processor
    #[error("Failed to queue event: {0}")]
    QueueFailed(String),

    /// Event processing failed in the background handler
    #[error("Event processing failed: {0}")]
    ProcessingFailed(String),
}

/// Idempotency storage errors
///
/// A storage error means the guard could not answer; callers must fail the
/// webhook request so the provider redelivers, never treat it as a boolean.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store could not complete the call
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A completion/failure marker referenced an ID that was never reserved
    #[error("Event was never reserved: {0}")]
    UnknownEvent(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    /// An environment variable held an unusable value
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Result type alias for PostPilot Billing operations
pub type Result<T> = std::result::Result<T, Error>;
