//! Error types and result handling for anime-sync.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use anime_sync::{Error, Result};
//!
//! fn delete_row() -> Result<()> {
//!     Err(Error::NotFound {
//!         table: "anime",
//!         id: "missing".to_string(),
//!     })
//! }
//!
//! match delete_row() {
//!     Ok(()) => println!("Deleted"),
//!     Err(e) if e.is_not_found() => println!("Already gone"),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for anime-sync operations.
///
/// Variants follow the stages of the per-message pipeline: decoding the
/// CDC body, mapping it to an entity, talking to storage, asking the flag
/// service for a routing decision and producing derived messages.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The message body is not a valid CDC envelope.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what could not be decoded
        message: String,
    },

    /// The envelope decoded but cannot be classified (both sides null).
    #[error("Malformed change event: {message}")]
    MalformedEvent {
        /// Description of the malformation
        message: String,
    },

    /// A field was present but not in the expected format.
    #[error("Mapping error on field '{field}' (value {value:?}): {message}")]
    Mapping {
        /// Wire name of the offending field
        field: &'static str,
        /// The raw value as received
        value: String,
        /// Parser message
        message: String,
    },

    /// PostgreSQL client or query error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A delete targeted a row that does not exist.
    #[error("No row with id '{id}' in table '{table}'")]
    NotFound {
        /// Table the delete ran against
        table: &'static str,
        /// Identity that was not found
        id: String,
    },

    /// The flag service could not be reached or answered with garbage.
    #[error("Flag service error: {0}")]
    FlagService(String),

    /// A derived message could not be delivered.
    #[error("Producer error on topic '{topic}': {message}")]
    Producer {
        /// Destination topic
        topic: String,
        /// Delivery failure description
        message: String,
    },

    /// Kafka client error outside of produce calls (consumer, admin).
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding outbound messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An outbound call did not answer in time.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Processing was cancelled (e.g., via Ctrl+C).
    #[error("Processing cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the retry envelope should attempt the message again.
    ///
    /// Malformed input stays malformed and cancellation must propagate
    /// immediately; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Decode { .. } | Error::MalformedEvent { .. } | Error::Cancelled | Error::Config(_)
        )
    }

    /// Whether this is the delete-not-found outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether the message should be dropped rather than redelivered.
    pub fn is_poison(&self) -> bool {
        matches!(self, Error::Decode { .. } | Error::MalformedEvent { .. })
    }
}

/// A convenient Result type alias for anime-sync operations.
///
/// This is equivalent to `std::result::Result<T, anime_sync::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
