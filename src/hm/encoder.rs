//! # HM Frame Encoder
//!
//! Builds outbound request and device control frames.
//!
//! ```text
//! [type][inverter(4)][dtu(4)][frame id][payload][crc16(2)][crc8]
//! ```
//!
//! The CRC16 seals the payload only and is omitted for an empty payload; the
//! CRC8 seals every byte before it.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::{crc16_modbus, crc8_hm};
use super::protocol::*;

/// Info request payload size
pub const INFO_REQUEST_PAYLOAD_LEN: usize = 14;

/// Offset of the big-endian epoch time inside the info request payload
pub const INFO_REQUEST_TIME_OFFSET: usize = 2;

/// A sealed frame ready for transmission
///
/// Built once per operation and resent unchanged on every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: Bytes,
}

impl OutboundFrame {
    /// Complete frame bytes including checksums
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Frame type byte
    pub fn frame_type(&self) -> u8 {
        self.bytes[0]
    }

    /// Address the frame is sent to (derived from the inverter serial bytes)
    pub fn inverter_address(&self) -> RadioAddress {
        radio_address(&[self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4]])
    }

    /// Address replies and acks come back on (derived from the DTU serial bytes)
    pub fn dtu_address(&self) -> RadioAddress {
        radio_address(&[self.bytes[5], self.bytes[6], self.bytes[7], self.bytes[8]])
    }
}

/// Build a telemetry (real-time run data) request
///
/// # Arguments
///
/// * `inverter` - Target inverter
/// * `dtu_serial` - Serial this node identifies itself with
/// * `now_epoch_seconds` - Current Unix time, sent to the inverter
///
/// # Examples
///
/// ```
/// use hm_link::hm::encoder::build_info_request;
/// use hm_link::hm::protocol::{InverterIdentity, DTU_SERIAL};
///
/// let inverter = InverterIdentity::new(112183212262)?;
/// let frame = build_info_request(&inverter, DTU_SERIAL, 1_700_000_000);
/// assert_eq!(frame.len(), 27);
/// # Ok::<(), hm_link::error::HmLinkError>(())
/// ```
pub fn build_info_request(
    inverter: &InverterIdentity,
    dtu_serial: u64,
    now_epoch_seconds: u32,
) -> OutboundFrame {
    let mut payload = [0u8; INFO_REQUEST_PAYLOAD_LEN];
    payload[0] = INFO_REALTIME_RUN_DATA;
    payload[INFO_REQUEST_TIME_OFFSET..INFO_REQUEST_TIME_OFFSET + 4]
        .copy_from_slice(&now_epoch_seconds.to_be_bytes());
    payload[9] = 0x05;

    seal_frame(FRAME_TYPE_REQ_INFO, inverter, dtu_serial, &payload)
}

/// Build a device control frame
///
/// The command field is two bytes (`[code, 0x00]`). When `value` is given it
/// is appended big-endian, followed by `modifier` big-endian.
///
/// # Arguments
///
/// * `inverter` - Target inverter
/// * `dtu_serial` - Serial this node identifies itself with
/// * `command` - Command to send
/// * `value` - Optional command argument (e.g. power limit)
/// * `modifier` - Modifier flags, only sent together with `value`
pub fn build_command_frame(
    inverter: &InverterIdentity,
    dtu_serial: u64,
    command: Command,
    value: Option<u16>,
    modifier: u16,
) -> OutboundFrame {
    let payload = encode_command_payload(command, value, modifier);
    seal_frame(FRAME_TYPE_REQ_DEVCONTROL, inverter, dtu_serial, &payload)
}

/// Encode a device control payload
pub fn encode_command_payload(command: Command, value: Option<u16>, modifier: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.push(command.code());
    payload.push(0x00);

    if let Some(value) = value {
        payload.extend_from_slice(&value.to_be_bytes());
        payload.extend_from_slice(&modifier.to_be_bytes());
    }

    payload
}

/// Modifier flags for a power limit command
pub fn power_limit_modifier(relative: bool, persist: bool) -> u16 {
    let mut modifier = 0;
    if persist {
        modifier |= LIMIT_MODIFIER_PERSIST;
    }
    if relative {
        modifier |= LIMIT_MODIFIER_RELATIVE;
    }
    modifier
}

fn seal_frame(
    frame_type: u8,
    inverter: &InverterIdentity,
    dtu_serial: u64,
    payload: &[u8],
) -> OutboundFrame {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + 1 + payload.len() + 3);
    frame.put_u8(frame_type);
    frame.put_slice(&inverter.address_bytes());
    frame.put_slice(&serial_address_bytes(dtu_serial));
    frame.put_u8(FRAME_ID_LAST);
    frame.put_slice(payload);

    if !payload.is_empty() {
        frame.put_u16(crc16_modbus(payload));
    }

    let crc = crc8_hm(&frame);
    frame.put_u8(crc);

    OutboundFrame {
        bytes: frame.freeze(),
    }
}
