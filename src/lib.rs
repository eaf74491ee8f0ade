//! # hm-link Library
//!
//! Talk to HM-series solar micro-inverters over their proprietary 2.4GHz link
//! using an nRF24L01+ transceiver.
//!
//! This library provides the link/protocol layer: frame construction, the two
//! link checksums, multi-fragment reassembly, channel-hopping reception and the
//! timeout/retry state machine that turns 32-byte radio frames into validated
//! telemetry records or command acknowledgments.

pub mod config;
pub mod error;
pub mod hm;
pub mod link;
pub mod radio;
pub mod telemetry;
