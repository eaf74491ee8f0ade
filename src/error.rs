//! # Error Types
//!
//! Custom error types for hm-link using `thiserror`.
//!
//! Only configuration problems and transceiver bus faults are errors. Link
//! conditions (checksum failures, timeouts, unacknowledged commands) are
//! reported through [`crate::link::StatusFlags`] instead.

use thiserror::Error;

use crate::radio::RadioError;

/// Main error type for hm-link
#[derive(Debug, Error)]
pub enum HmLinkError {
    /// Serial number prefix does not match a known inverter family
    #[error("Unsupported inverter family for serial {0}")]
    UnsupportedInverterFamily(u64),

    /// Transmit channel outside the fixed channel table
    #[error("Invalid tx channel {0}")]
    InvalidTxChannel(u8),

    /// Power level index outside the four supported levels
    #[error("Invalid power level {0} (must be 0-3)")]
    InvalidPowerLevel(u8),

    /// No valid telemetry sample could be read before sending a command
    #[error("Event counter baseline unavailable after {attempts} attempts")]
    BaselineUnavailable { attempts: u32 },

    /// Transceiver bus errors
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for hm-link
pub type Result<T> = std::result::Result<T, HmLinkError>;
