//! # HM Frame Decoder
//!
//! Decodes inbound radio frames into fragments and reassembled responses into
//! telemetry records.

use super::crc::{crc16_modbus, crc8_hm};
use super::protocol::*;

/// Mask applied to every field of a fresh sample; keeps 4-byte totals whole
pub const VALID_MASK: u32 = u32::MAX;

/// Mask applied when the fetch timed out: values zeroed, shape kept
pub const STALE_MASK: u32 = 0;

/// One inbound radio frame carrying part of an inverter response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    frame: [u8; FRAGMENT_FRAME_LEN],
}

impl Fragment {
    /// Take the meaningful prefix of a raw 32-byte receive frame
    pub fn from_raw(raw: &[u8; RADIO_FRAME_SIZE]) -> Self {
        let mut frame = [0u8; FRAGMENT_FRAME_LEN];
        frame.copy_from_slice(&raw[..FRAGMENT_FRAME_LEN]);
        Self { frame }
    }

    /// Fragment id (`0x80` bit marks the last fragment of a response)
    pub fn leading_id(&self) -> u8 {
        self.frame[FRAME_HEADER_LEN]
    }

    /// The 16 response bytes this fragment carries
    pub fn payload(&self) -> &[u8] {
        &self.frame[FRAME_HEADER_LEN + 1..FRAGMENT_FRAME_LEN - 1]
    }

    /// Trailing CRC8 as received
    pub fn checksum(&self) -> u8 {
        self.frame[FRAGMENT_FRAME_LEN - 1]
    }

    /// Check the trailing CRC8 against the rest of the frame
    pub fn is_valid(&self) -> bool {
        crc8_hm(&self.frame[..FRAGMENT_FRAME_LEN - 1]) == self.checksum()
    }
}

/// Telemetry values in schema field order
///
/// The length always equals the family's field count, also for timed-out
/// fetches (where every value is zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    values: Vec<u32>,
}

impl TelemetryRecord {
    /// All-zero record for a schema
    pub fn zeroed(schema: &FrameSchema) -> Self {
        Self {
            values: vec![0; schema.field_count()],
        }
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, if the record has that many fields
    pub fn get(&self, index: usize) -> Option<u32> {
        self.values.get(index).copied()
    }

    /// The inverter's event counter
    pub fn event_counter(&self, schema: &FrameSchema) -> Option<u32> {
        self.get(schema.event_field)
    }
}

/// Check the CRC16 sealing a reassembled response
///
/// The last two bytes hold the big-endian CRC16 of everything before them.
pub fn verify_reassembled(buffer: &[u8]) -> bool {
    if buffer.len() < 2 {
        return false;
    }

    let (body, crc) = buffer.split_at(buffer.len() - 2);
    crc16_modbus(body) == u16::from_be_bytes([crc[0], crc[1]])
}

/// Parse a reassembled response into a telemetry record
///
/// Each field is the big-endian unsigned integer at its byte range, ANDed with
/// `valid_mask` ([`VALID_MASK`] or [`STALE_MASK`]). Ranges past the end of the
/// buffer decode as zero.
///
/// # Examples
///
/// ```
/// use hm_link::hm::decoder::{parse_telemetry, STALE_MASK};
/// use hm_link::hm::protocol::Family;
///
/// let schema = Family::Family2.schema();
/// let record = parse_telemetry(&[0xFF; 44], schema, STALE_MASK);
/// assert_eq!(record.len(), 18);
/// assert!(record.values().iter().all(|&v| v == 0));
/// ```
pub fn parse_telemetry(buffer: &[u8], schema: &FrameSchema, valid_mask: u32) -> TelemetryRecord {
    let values = schema
        .fields
        .iter()
        .map(|&(start, end)| {
            let raw = buffer
                .get(start..end)
                .map(|bytes| bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
                .unwrap_or(0);
            raw & valid_mask
        })
        .collect();

    TelemetryRecord { values }
}
