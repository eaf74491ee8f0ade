//! # HM Protocol Constants and Types
//!
//! Core protocol definitions for the HM-series inverter radio link.

use crate::error::{HmLinkError, Result};

/// Serial number of this node. The inverter answers whichever DTU serial
/// appears in a request, so any fixed value works.
pub const DTU_SERIAL: u64 = 99_978_563_001;

/// Telemetry (info) request frame type
pub const FRAME_TYPE_REQ_INFO: u8 = 0x15;

/// Device control request frame type
pub const FRAME_TYPE_REQ_DEVCONTROL: u8 = 0x51;

/// Sub-command carried in an info request: real-time run data
pub const INFO_REALTIME_RUN_DATA: u8 = 0x0B;

/// Set on the frame id byte of the last (here: only) outbound frame
pub const FRAME_ID_LAST: u8 = 0x80;

/// Marker byte prepended to the 4 serial bytes to form a radio address
pub const RADIO_ADDRESS_MARKER: u8 = 0x01;

/// Transmit channels, in configuration index order
pub const TX_CHANNELS: [u8; 5] = [3, 23, 40, 61, 75];

/// Radio frame size delivered by the transceiver
pub const RADIO_FRAME_SIZE: usize = 32;

/// Meaningful prefix of an inbound radio frame (header + payload + crc8)
pub const FRAGMENT_FRAME_LEN: usize = 27;

/// Header bytes before the leading id: type(1) + inverter(4) + dtu(4)
pub const FRAME_HEADER_LEN: usize = 9;

/// Payload bytes carried by one inbound fragment
pub const FRAGMENT_PAYLOAD_LEN: usize = 16;

/// Five-byte pipe address as written to the transceiver
pub type RadioAddress = [u8; 5];

/// Receive channels paired with a transmit channel
///
/// Returns `None` when `tx_channel` is not one of [`TX_CHANNELS`].
pub fn rx_channels(tx_channel: u8) -> Option<[u8; 2]> {
    match tx_channel {
        3 => Some([40, 61]),
        23 => Some([61, 75]),
        40 => Some([3, 75]),
        61 => Some([3, 23]),
        75 => Some([23, 40]),
        _ => None,
    }
}

/// Pack the last eight decimal digits of a serial number into four bytes,
/// two digits per byte (`...83212262` → `[0x83, 0x21, 0x22, 0x62]`).
pub fn serial_address_bytes(serial: u64) -> [u8; 4] {
    let mut digits = serial % 100_000_000;
    let mut bytes = [0u8; 4];

    for byte in bytes.iter_mut().rev() {
        let low = (digits % 10) as u8;
        let high = ((digits / 10) % 10) as u8;
        *byte = (high << 4) | low;
        digits /= 100;
    }

    bytes
}

/// Radio address for four serial bytes taken from a frame
pub fn radio_address(serial_bytes: &[u8; 4]) -> RadioAddress {
    [
        RADIO_ADDRESS_MARKER,
        serial_bytes[0],
        serial_bytes[1],
        serial_bytes[2],
        serial_bytes[3],
    ]
}

/// Device control command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Switch AC output on
    On = 0,
    /// Switch AC output off
    Off = 1,
    /// Limit active output power
    SetPowerLimit = 11,
}

impl Command {
    /// Wire code of this command
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Power limit modifier: keep the limit across a power cycle
pub const LIMIT_MODIFIER_PERSIST: u16 = 0x0100;

/// Power limit modifier: the value is a percentage, not watts
pub const LIMIT_MODIFIER_RELATIVE: u16 = 0x0001;

/// Frame layout of one inverter family's telemetry response
#[derive(Debug, PartialEq, Eq)]
pub struct FrameSchema {
    /// Leading ids of the expected fragments, in assembly order
    pub fragment_ids: &'static [u8],

    /// Reassembled length including the trailing CRC16
    pub assembled_len: usize,

    /// Byte ranges `(start, end)` of each telemetry field
    pub fields: &'static [(usize, usize)],

    /// Index into `fields` of the event counter
    pub event_field: usize,
}

impl FrameSchema {
    /// Number of telemetry fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

static FAMILY1_SCHEMA: FrameSchema = FrameSchema {
    fragment_ids: &[0x01, 0x82],
    assembled_len: 32,
    fields: &[
        (2, 4), (4, 6), (6, 8), (8, 12), (12, 14), (14, 16), (16, 18),
        (18, 20), (20, 22), (22, 24), (24, 26), (26, 28), (28, 30),
    ],
    event_field: 12,
};

static FAMILY2_SCHEMA: FrameSchema = FrameSchema {
    fragment_ids: &[0x01, 0x02, 0x83],
    assembled_len: 44,
    fields: &[
        (2, 4), (4, 6), (6, 8), (8, 10), (10, 12), (12, 14), (14, 18), (18, 22), (22, 24),
        (24, 26), (26, 28), (28, 30), (30, 32), (32, 34), (34, 36), (36, 38), (38, 40), (40, 42),
    ],
    event_field: 17,
};

static FAMILY3_SCHEMA: FrameSchema = FrameSchema {
    fragment_ids: &[0x01, 0x02, 0x03, 0x04, 0x85],
    assembled_len: 64,
    fields: &[
        (2, 4), (4, 6), (6, 8), (8, 10), (10, 12), (12, 16), (16, 20), (20, 22), (22, 24),
        (24, 26), (26, 28), (28, 30), (30, 32), (32, 34), (34, 38), (38, 42), (42, 44),
        (44, 46), (46, 48), (48, 50), (50, 52), (52, 54), (54, 56), (56, 58), (58, 60), (60, 62),
    ],
    event_field: 25,
};

/// Inverter product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// HM-300, HM-350, HM-400 (one input)
    Family1,
    /// HM-600, HM-700, HM-800 (two inputs)
    Family2,
    /// HM-1200, HM-1500 (four inputs)
    Family3,
}

impl Family {
    /// Look up the family from the first four decimal digits of a serial
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedInverterFamily` for any other prefix.
    pub fn from_serial(serial: u64) -> Result<Self> {
        let digits = serial.to_string();
        match digits.get(..4) {
            Some("1121") => Ok(Family::Family1),
            Some("1141") => Ok(Family::Family2),
            Some("1161") => Ok(Family::Family3),
            _ => Err(HmLinkError::UnsupportedInverterFamily(serial)),
        }
    }

    /// Response layout for this family
    pub fn schema(self) -> &'static FrameSchema {
        match self {
            Family::Family1 => &FAMILY1_SCHEMA,
            Family::Family2 => &FAMILY2_SCHEMA,
            Family::Family3 => &FAMILY3_SCHEMA,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Family::Family1 => "HM-300/350/400",
            Family::Family2 => "HM-600/700/800",
            Family::Family3 => "HM-1200/1500",
        };
        f.write_str(name)
    }
}

/// A specific inverter on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InverterIdentity {
    serial: u64,
    family: Family,
}

impl InverterIdentity {
    /// Create an identity from the inverter's full serial number
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedInverterFamily` if the serial prefix is unknown.
    ///
    /// # Examples
    ///
    /// ```
    /// use hm_link::hm::protocol::{Family, InverterIdentity};
    ///
    /// let inverter = InverterIdentity::new(112183212262)?;
    /// assert_eq!(inverter.family(), Family::Family1);
    /// # Ok::<(), hm_link::error::HmLinkError>(())
    /// ```
    pub fn new(serial: u64) -> Result<Self> {
        let family = Family::from_serial(serial)?;
        Ok(Self { serial, family })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Four serial bytes as carried in frame headers
    pub fn address_bytes(&self) -> [u8; 4] {
        serial_address_bytes(self.serial)
    }
}
