//! # nRF24L01+ Driver
//!
//! Register-level driver for the nRF24L01+ 2.4GHz transceiver, generic over
//! `embedded-hal` 1.0 SPI, GPIO and delay traits.
//!
//! ## Link setup
//!
//! - 5-byte addresses, 250 kbps, 2-byte hardware CRC
//! - 8 automatic retransmits, 1750 µs apart
//! - Receive frames are always read as 32 bytes

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use tracing::{debug, trace};

use super::{PowerLevel, RadioError, Transceiver};
use crate::hm::protocol::{RadioAddress, RADIO_FRAME_SIZE};

/// Register addresses
pub mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const EN_AA: u8 = 0x01;
    pub const EN_RXADDR: u8 = 0x02;
    pub const SETUP_AW: u8 = 0x03;
    pub const SETUP_RETR: u8 = 0x04;
    pub const RF_CH: u8 = 0x05;
    pub const RF_SETUP: u8 = 0x06;
    pub const STATUS: u8 = 0x07;
    pub const RX_ADDR_P0: u8 = 0x0A;
    pub const TX_ADDR: u8 = 0x10;
    pub const RX_PW_P0: u8 = 0x11;
    pub const FIFO_STATUS: u8 = 0x17;
    pub const DYNPD: u8 = 0x1C;
    pub const FEATURE: u8 = 0x1D;
}

/// SPI commands
mod cmd {
    pub const R_REGISTER: u8 = 0x00;
    pub const W_REGISTER: u8 = 0x20;
    pub const R_RX_PAYLOAD: u8 = 0x61;
    pub const W_TX_PAYLOAD: u8 = 0xA0;
    pub const FLUSH_TX: u8 = 0xE1;
    pub const FLUSH_RX: u8 = 0xE2;
    pub const NOP: u8 = 0xFF;
}

// CONFIG bits
const EN_CRC: u8 = 0x08;
const CRCO: u8 = 0x04;
const PWR_UP: u8 = 0x02;
const PRIM_RX: u8 = 0x01;

// STATUS bits
const RX_DR: u8 = 0x40;
const TX_DS: u8 = 0x20;
const MAX_RT: u8 = 0x10;

// FIFO_STATUS bits
const RX_EMPTY: u8 = 0x01;

/// RF_SETUP data rate bit for 250 kbps
const SPEED_250K: u8 = 0x20;

/// Highest RF channel the chip accepts
const MAX_CHANNEL: u8 = 125;

/// Upper bound for waiting on TX_DS/MAX_RT after a send
const SEND_TIMEOUT_MS: u32 = 500;

/// nRF24L01+ on an SPI device with a chip-enable pin
pub struct Nrf24<SPI, CE, D> {
    spi: SPI,
    ce: CE,
    delay: D,
}

impl<SPI, CE, D> std::fmt::Debug for Nrf24<SPI, CE, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nrf24").finish_non_exhaustive()
    }
}

impl<SPI, CE, D> Nrf24<SPI, CE, D>
where
    SPI: SpiDevice,
    CE: OutputPin,
    D: DelayNs,
{
    /// Initialize the chip for the inverter link
    ///
    /// # Errors
    ///
    /// Returns `NotDetected` if the CONFIG register does not read back what
    /// was written (no chip, or wiring fault), `Bus` on SPI/GPIO failures.
    pub fn new(spi: SPI, ce: CE, delay: D) -> Result<Self, RadioError> {
        let mut radio = Self { spi, ce, delay };

        radio.ce_low()?;
        radio.delay.delay_ms(5);

        radio.write_reg(reg::SETUP_AW, 0b11)?;
        radio.write_reg(reg::SETUP_RETR, (6 << 4) | 8)?;
        radio.write_reg(reg::RF_SETUP, PowerLevel::Min.register_bits() | SPEED_250K)?;

        let config = EN_CRC | CRCO;
        radio.write_reg(reg::CONFIG, config)?;
        if radio.read_reg(reg::CONFIG)? != config {
            return Err(RadioError::NotDetected);
        }

        radio.write_reg(reg::STATUS, RX_DR | TX_DS | MAX_RT)?;
        radio.command(cmd::FLUSH_RX)?;
        radio.command(cmd::FLUSH_TX)?;

        debug!("nRF24L01+ initialized");
        Ok(radio)
    }

    /// Give back the bus, pin and delay
    pub fn release(self) -> (SPI, CE, D) {
        (self.spi, self.ce, self.delay)
    }

    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), RadioError> {
        self.spi
            .transfer_in_place(buf)
            .map_err(|e| RadioError::Bus(format!("SPI transfer failed: {:?}", e)))
    }

    fn command(&mut self, command: u8) -> Result<u8, RadioError> {
        let mut buf = [command];
        self.transfer(&mut buf)?;
        Ok(buf[0])
    }

    fn read_reg(&mut self, register: u8) -> Result<u8, RadioError> {
        let mut buf = [cmd::R_REGISTER | register, cmd::NOP];
        self.transfer(&mut buf)?;
        Ok(buf[1])
    }

    fn write_reg(&mut self, register: u8, value: u8) -> Result<(), RadioError> {
        let mut buf = [cmd::W_REGISTER | register, value];
        self.transfer(&mut buf)
    }

    fn write_reg_bytes(&mut self, register: u8, bytes: &[u8]) -> Result<(), RadioError> {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.push(cmd::W_REGISTER | register);
        buf.extend_from_slice(bytes);
        self.transfer(&mut buf)
    }

    fn ce_high(&mut self) -> Result<(), RadioError> {
        self.ce
            .set_high()
            .map_err(|e| RadioError::Bus(format!("CE pin: {:?}", e)))
    }

    fn ce_low(&mut self) -> Result<(), RadioError> {
        self.ce
            .set_low()
            .map_err(|e| RadioError::Bus(format!("CE pin: {:?}", e)))
    }
}

impl<SPI, CE, D> Transceiver for Nrf24<SPI, CE, D>
where
    SPI: SpiDevice,
    CE: OutputPin,
    D: DelayNs,
{
    fn set_power_level(&mut self, level: PowerLevel) -> Result<(), RadioError> {
        self.write_reg(reg::RF_SETUP, level.register_bits() | SPEED_250K)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.write_reg(reg::RF_CH, channel.min(MAX_CHANNEL))
    }

    fn flush_transmit_buffer(&mut self) -> Result<(), RadioError> {
        self.command(cmd::FLUSH_TX).map(|_| ())
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.ce_low()?;
        self.command(cmd::FLUSH_TX)?;
        self.command(cmd::FLUSH_RX)?;
        Ok(())
    }

    fn start_listening(&mut self) -> Result<(), RadioError> {
        let config = self.read_reg(reg::CONFIG)?;
        self.write_reg(reg::CONFIG, config | PWR_UP | PRIM_RX)?;
        self.write_reg(reg::STATUS, RX_DR | TX_DS | MAX_RT)?;
        self.command(cmd::FLUSH_RX)?;
        self.command(cmd::FLUSH_TX)?;
        self.ce_high()?;
        self.delay.delay_us(130);
        Ok(())
    }

    fn open_transmit_pipe(&mut self, address: &RadioAddress) -> Result<(), RadioError> {
        self.write_reg_bytes(reg::TX_ADDR, address)?;
        // Pipe 0 receives the auto-ack for the transmitted frame
        self.write_reg_bytes(reg::RX_ADDR_P0, address)?;
        self.write_reg(reg::RX_PW_P0, RADIO_FRAME_SIZE as u8)
    }

    fn open_receive_pipe(&mut self, pipe: u8, address: &RadioAddress) -> Result<(), RadioError> {
        if pipe > 5 {
            return Err(RadioError::Bus(format!("Invalid pipe {}", pipe)));
        }

        // Pipes 2-5 share the upper address bytes of pipe 1
        if pipe < 2 {
            self.write_reg_bytes(reg::RX_ADDR_P0 + pipe, address)?;
        } else {
            self.write_reg(reg::RX_ADDR_P0 + pipe, address[0])?;
        }
        self.write_reg(reg::RX_PW_P0 + pipe, RADIO_FRAME_SIZE as u8)?;

        let enabled = self.read_reg(reg::EN_RXADDR)?;
        self.write_reg(reg::EN_RXADDR, enabled | (1 << pipe))
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let config = self.read_reg(reg::CONFIG)?;
        self.write_reg(reg::CONFIG, (config | PWR_UP) & !PRIM_RX)?;
        self.delay.delay_us(150);

        let mut buf = Vec::with_capacity(frame.len() + 1);
        buf.push(cmd::W_TX_PAYLOAD);
        buf.extend_from_slice(frame);
        self.transfer(&mut buf)?;

        self.ce_high()?;
        self.delay.delay_us(15);
        self.ce_low()?;

        let mut waited_ms = 0;
        let status = loop {
            let status = self.command(cmd::NOP)?;
            if status & (TX_DS | MAX_RT) != 0 {
                break status;
            }
            if waited_ms >= SEND_TIMEOUT_MS {
                break status;
            }
            self.delay.delay_ms(1);
            waited_ms += 1;
        };

        self.write_reg(reg::STATUS, RX_DR | TX_DS | MAX_RT)?;

        if status & TX_DS != 0 {
            trace!("Sent {} byte frame", frame.len());
            Ok(())
        } else {
            self.command(cmd::FLUSH_TX)?;
            Err(RadioError::SendFailed)
        }
    }

    fn has_incoming_data(&mut self) -> Result<bool, RadioError> {
        Ok(self.read_reg(reg::FIFO_STATUS)? & RX_EMPTY == 0)
    }

    fn receive_fixed_frame(&mut self) -> Result<[u8; RADIO_FRAME_SIZE], RadioError> {
        let mut buf = [cmd::NOP; RADIO_FRAME_SIZE + 1];
        buf[0] = cmd::R_RX_PAYLOAD;
        self.transfer(&mut buf)?;
        self.write_reg(reg::STATUS, RX_DR)?;

        let mut frame = [0u8; RADIO_FRAME_SIZE];
        frame.copy_from_slice(&buf[1..]);
        Ok(frame)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), RadioError> {
        self.write_reg(register, value)
    }

    fn enable_dynamic_payload_length(&mut self) -> Result<(), RadioError> {
        self.write_reg(reg::FEATURE, 0b100)?;
        self.write_reg(reg::DYNPD, 0b11)
    }

    fn enable_auto_ack(&mut self, pipe_mask: u8) -> Result<(), RadioError> {
        self.write_reg(reg::EN_AA, pipe_mask & 0b11_1111)
    }
}
