//! # HM Link Protocol Module
//!
//! Implementation of the HM-series inverter radio protocol.
//!
//! This module handles:
//! - Request and device control frame encoding
//! - Fragment decoding and telemetry parsing per inverter family
//! - Reassembly of multi-fragment responses
//! - CRC-16/MODBUS and link CRC-8 checksums

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod reassembly;
pub mod crc;
