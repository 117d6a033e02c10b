//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of faults the protocol engine
//! can hit, from configuration problems to protocol-level failures.
//!
//! ## Propagation policy
//!
//! Low-level transport faults never crash the process: the instrument clients
//! convert them to in-band NAK-bearing responses (see
//! [`crate::protocol::Response::nak`]). Sequencing faults — poll timeouts,
//! malformed dump records, sink failures — are explicit `ScanError` values
//! surfaced to the orchestration layer. Nothing is silently swallowed above
//! the instrument client layer.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serial port not connected")]
    PortNotOpen,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Non-ASCII character {ch:?} in command {command:?}")]
    Encoding { command: String, ch: char },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timed out waiting for ready ({context}) after {attempts} probes")]
    PollTimeout { context: String, attempts: u32 },

    #[error("Malformed dump record at index {index}: {line:?}")]
    MalformedRecord { index: usize, line: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Program upload error: {0}")]
    Upload(String),

    #[error("Acquisition sequence already running")]
    SequenceBusy,
}
