//! # Inverter Link Module
//!
//! Request/response sessions with one inverter over the radio.
//!
//! This module handles:
//! - Telemetry fetches with retry, reassembly and checksum verification
//! - Device control commands confirmed through the event counter
//! - Power limit updates
//! - Outcome reporting via status flags

pub mod clock;
pub mod session;
pub mod status;

pub use clock::{Clock, SystemClock};
pub use session::{tx_channel_for_index, LinkConfig, LinkSession};
pub use status::StatusFlags;
