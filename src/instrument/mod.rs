//! Instrument clients for the two devices on the serial links.
//!
//! Each client owns a [`crate::transport::ByteTransport`] plus the
//! [`crate::link::Link`] guarding its wire, frames commands through the
//! codec, and converts transport faults into in-band NAK-bearing responses
//! so callers never see raw I/O errors. Retries are the caller's concern;
//! a client performs exactly one exchange per call.

pub mod acq;
pub mod motor;

pub use acq::AcqClient;
pub use motor::MotorClient;
