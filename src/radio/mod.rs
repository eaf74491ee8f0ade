//! # Radio Transceiver Module
//!
//! Capability set the link session drives, and the nRF24L01+ driver that
//! provides it.
//!
//! This module handles:
//! - The `Transceiver` trait (channel, power, pipes, send/receive, registers)
//! - Transmit power levels
//! - Register-level nRF24L01+ access over `embedded-hal` SPI
//! - Opening the transceiver on a Linux host (feature `linux`)

use thiserror::Error;

use crate::error::{HmLinkError, Result};
use crate::hm::protocol::{RadioAddress, RADIO_FRAME_SIZE};

pub mod nrf24;

#[cfg(feature = "linux")]
pub mod linux;

/// Transceiver errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// SPI or GPIO access failed
    #[error("bus error: {0}")]
    Bus(String),

    /// Frame was not acknowledged within the retransmit budget
    #[error("send failed: no acknowledgment")]
    SendFailed,

    /// The chip did not answer as expected during setup
    #[error("transceiver not detected")]
    NotDetected,
}

/// Transmit power level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerLevel {
    /// -18 dBm
    #[default]
    Min,
    /// -12 dBm
    Low,
    /// -6 dBm
    High,
    /// 0 dBm
    Max,
}

impl PowerLevel {
    /// Power level from its configuration index (0 = min .. 3 = max)
    ///
    /// # Errors
    ///
    /// Returns `InvalidPowerLevel` for indices above 3.
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(PowerLevel::Min),
            1 => Ok(PowerLevel::Low),
            2 => Ok(PowerLevel::High),
            3 => Ok(PowerLevel::Max),
            _ => Err(HmLinkError::InvalidPowerLevel(index)),
        }
    }

    /// RF_PWR bits of the RF_SETUP register
    pub fn register_bits(self) -> u8 {
        match self {
            PowerLevel::Min => 0x00,
            PowerLevel::Low => 0x02,
            PowerLevel::High => 0x04,
            PowerLevel::Max => 0x06,
        }
    }
}

/// Operations the link session needs from the 2.4GHz transceiver
///
/// Implementations own the chip's channel, pipe and power registers; callers
/// reconfigure them before every transmit or listen and never read them back.
#[cfg_attr(test, mockall::automock)]
pub trait Transceiver {
    /// Set transmit power
    fn set_power_level(&mut self, level: PowerLevel) -> std::result::Result<(), RadioError>;

    /// Tune to an RF channel (2400 MHz + channel)
    fn set_channel(&mut self, channel: u8) -> std::result::Result<(), RadioError>;

    /// Drop anything waiting in the transmit FIFO
    fn flush_transmit_buffer(&mut self) -> std::result::Result<(), RadioError>;

    /// Leave receive mode
    fn stop_listening(&mut self) -> std::result::Result<(), RadioError>;

    /// Enter receive mode on the current channel
    fn start_listening(&mut self) -> std::result::Result<(), RadioError>;

    /// Address outbound frames (and their acks) are sent to
    fn open_transmit_pipe(&mut self, address: &RadioAddress) -> std::result::Result<(), RadioError>;

    /// Address a receive pipe listens on
    fn open_receive_pipe(&mut self, pipe: u8, address: &RadioAddress) -> std::result::Result<(), RadioError>;

    /// Transmit one frame, blocking until it was sent or failed
    fn send(&mut self, frame: &[u8]) -> std::result::Result<(), RadioError>;

    /// Whether a received frame is waiting
    fn has_incoming_data(&mut self) -> std::result::Result<bool, RadioError>;

    /// Read the next received frame
    fn receive_fixed_frame(&mut self) -> std::result::Result<[u8; RADIO_FRAME_SIZE], RadioError>;

    /// Raw register write
    fn write_register(&mut self, register: u8, value: u8) -> std::result::Result<(), RadioError>;

    /// Accept frames of any length on pipes 0 and 1
    fn enable_dynamic_payload_length(&mut self) -> std::result::Result<(), RadioError>;

    /// Enable auto acknowledgment on the pipes in `pipe_mask`
    fn enable_auto_ack(&mut self, pipe_mask: u8) -> std::result::Result<(), RadioError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_level_from_index() {
        assert_eq!(PowerLevel::from_index(0).unwrap(), PowerLevel::Min);
        assert_eq!(PowerLevel::from_index(1).unwrap(), PowerLevel::Low);
        assert_eq!(PowerLevel::from_index(2).unwrap(), PowerLevel::High);
        assert_eq!(PowerLevel::from_index(3).unwrap(), PowerLevel::Max);

        match PowerLevel::from_index(4) {
            Err(HmLinkError::InvalidPowerLevel(4)) => {}
            other => panic!("Expected InvalidPowerLevel, got: {:?}", other),
        }
    }

    #[test]
    fn test_power_level_register_bits() {
        assert_eq!(PowerLevel::Min.register_bits(), 0x00);
        assert_eq!(PowerLevel::Low.register_bits(), 0x02);
        assert_eq!(PowerLevel::High.register_bits(), 0x04);
        assert_eq!(PowerLevel::Max.register_bits(), 0x06);
        assert_eq!(PowerLevel::default(), PowerLevel::Min);
    }

    #[test]
    fn test_radio_error_display() {
        assert_eq!(RadioError::SendFailed.to_string(), "send failed: no acknowledgment");
        assert_eq!(RadioError::Bus("spi".to_string()).to_string(), "bus error: spi");
    }

    #[test]
    fn test_scripted_radio_answers_info_request() {
        use crate::hm::decoder::Fragment;
        use crate::hm::encoder::build_info_request;
        use crate::hm::protocol::{InverterIdentity, DTU_SERIAL};

        let mut radio = mocks::ScriptedRadio::new(112183212262);
        let inverter = InverterIdentity::new(112183212262).unwrap();
        let frame = build_info_request(&inverter, DTU_SERIAL, 0);

        radio.send(frame.as_bytes()).unwrap();

        let mut ids = Vec::new();
        while radio.has_incoming_data().unwrap() {
            let fragment = Fragment::from_raw(&radio.receive_fixed_frame().unwrap());
            assert!(fragment.is_valid());
            ids.push(fragment.leading_id());
        }
        assert_eq!(ids, vec![0x01, 0x82]);
    }
}
