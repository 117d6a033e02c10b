//! # scandaq
//!
//! Protocol engine for a two-instrument scanning rig: a motor controller
//! and a data-acquisition card, each on its own serial link. The crate
//! frames and annotates the instruments' byte-level protocols, arbitrates
//! access to each link, and drives the scan sequence that moves an axis,
//! waits for the card, collects its dump and persists the records.
//!
//! ## Crate Structure
//!
//! - **`config`**: TOML-backed settings (`config/default.toml`) for ports,
//!   polling and the sequence definition. See `config::Settings`.
//! - **`protocol`**: The wire formats. Motor frames (`STX`/address/`ETX`
//!   with hex-coded payloads), acquisition frames (CR-terminated), and the
//!   annotated-response form in which control bytes appear as `<STX>`-style
//!   markers.
//! - **`transport`**: The `ByteTransport` trait with the real serial
//!   implementation (feature `instrument_serial`) and a scripted mock.
//! - **`link`**: Reentrant async mutex guarding each serial link, so one
//!   logical operation's write and read are never interleaved with another
//!   caller's.
//! - **`instrument`**: Typed clients for the two devices, `MotorClient`
//!   and `AcqClient`.
//! - **`poll`**: Bounded retry loop used everywhere the rig is waited on.
//! - **`dump`**: Collection of the card's data dump, terminated by record
//!   count or by sentinel.
//! - **`sequence`**: The acquisition sequence state machine.
//! - **`params`**: Motor parameter sweeps (`XPnnR` / `YPnnR`).
//! - **`upload`**: Stored-program upload to the motor controller.
//! - **`storage`**: `PersistenceSink` with CSV (feature `storage_csv`) and
//!   in-memory implementations.
//! - **`engine`**: Facade handing all of the above to a frontend over an
//!   event channel.
//! - **`error`**: The crate-wide `ScanError`.

pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod link;
pub mod params;
pub mod poll;
pub mod protocol;
pub mod sequence;
pub mod storage;
pub mod transport;
pub mod upload;

pub use engine::{Engine, EngineEvent};
pub use error::{AppResult, ScanError};
pub use link::{Link, LinkToken};
pub use protocol::Response;
pub use sequence::{SequenceConfig, SequenceOutcome, StopHandle};
