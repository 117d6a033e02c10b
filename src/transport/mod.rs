//! Byte-level transport abstraction for the two serial links.
//!
//! The protocol engine consumes an opaque [`ByteTransport`] capability: open
//! and close the port, write raw bytes, and read one line within the
//! transport's configured timeout. Device discovery, baud negotiation and OS
//! handle management live behind the implementations, not in the engine.
//!
//! Two implementations are provided: [`serial::SerialTransport`] over the
//! `serialport` crate (behind the `instrument_serial` feature) and
//! [`mock::MockTransport`] for tests and dry runs.

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::{MockTransport, TransportOp};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

/// Opaque byte-level capability over one physical serial link.
///
/// `read_line` blocks for at most the transport's configured timeout and
/// returns an empty string when no complete line arrived in time; only
/// genuine I/O failures surface as errors.
#[async_trait]
pub trait ByteTransport: Send + Sync {
    /// Open the underlying port. Idempotent when already open.
    async fn open(&self) -> AppResult<()>;

    /// Close the underlying port if open.
    async fn close(&self);

    /// Write raw bytes to the link.
    async fn write_bytes(&self, bytes: &[u8]) -> AppResult<()>;

    /// Read one line, decoded as text with lossy fallback and trailing
    /// whitespace stripped. Empty string on timeout.
    async fn read_line(&self) -> AppResult<String>;

    /// Whether the underlying port currently reports open.
    fn is_open(&self) -> bool;
}
