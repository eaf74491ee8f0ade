//! # Link Status Flags
//!
//! Outcome bits of a telemetry fetch or command. Link problems never abort a
//! call; they are reported here next to a best-effort result.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;

/// Bitset of link outcome flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// Telemetry was reassembled and passed its CRC16
    pub const DATA_VALID: Self = Self(0b0_0001);
    /// At least one fragment failed its CRC8 during the fetch
    pub const FRAME_CHECKSUM_ERROR: Self = Self(0b0_0010);
    /// A complete response failed its CRC16 and was re-requested
    pub const REASSEMBLY_CHECKSUM_ERROR: Self = Self(0b0_0100);
    /// The fetch ran out of time; values are zeroed
    pub const TIMED_OUT: Self = Self(0b0_1000);
    /// No event counter change was observed after a command
    pub const COMMAND_UNACKNOWLEDGED: Self = Self(0b1_0000);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::DATA_VALID, "data-valid"),
        (Self::FRAME_CHECKSUM_ERROR, "frame-checksum-error"),
        (Self::REASSEMBLY_CHECKSUM_ERROR, "reassembly-checksum-error"),
        (Self::TIMED_OUT, "timed-out"),
        (Self::COMMAND_UNACKNOWLEDGED, "command-unacknowledged"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_valid(self) -> bool {
        self.contains(Self::DATA_VALID)
    }

    pub fn timed_out(self) -> bool {
        self.contains(Self::TIMED_OUT)
    }
}

impl BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
