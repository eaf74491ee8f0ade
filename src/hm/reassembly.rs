//! # Fragment Reassembly
//!
//! Collects the fragments of one inverter response and joins them in schema
//! order, independent of the order they arrived in.

use std::collections::HashMap;

use tracing::trace;

use super::decoder::Fragment;
use super::protocol::FrameSchema;

/// Result of offering a fragment to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// Frame CRC8 mismatch; the fragment was dropped and nothing changed
    ChecksumMismatch,
    /// Stored; more fragments are still outstanding
    Incomplete,
    /// Stored; every expected fragment has arrived
    Complete,
}

/// Reassembly state for one telemetry fetch
#[derive(Debug)]
pub struct ReassemblyTracker {
    schema: &'static FrameSchema,
    outstanding: Vec<u8>,
    collected: HashMap<u8, Fragment>,
}

impl ReassemblyTracker {
    pub fn new(schema: &'static FrameSchema) -> Self {
        Self {
            schema,
            outstanding: schema.fragment_ids.to_vec(),
            collected: HashMap::new(),
        }
    }

    /// Expect every fragment of the schema again and forget collected ones
    pub fn reset(&mut self) {
        self.outstanding.clear();
        self.outstanding.extend_from_slice(self.schema.fragment_ids);
        self.collected.clear();
    }

    /// Fragment ids still missing, in schema order
    pub fn outstanding(&self) -> &[u8] {
        &self.outstanding
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Offer a received fragment
    ///
    /// A fragment failing its CRC8 is discarded without touching the state.
    /// Otherwise it is stored under its leading id (replacing an earlier copy)
    /// and the id is crossed off the outstanding list.
    pub fn absorb(&mut self, fragment: Fragment) -> Absorbed {
        if !fragment.is_valid() {
            trace!("Dropping fragment 0x{:02X}: CRC8 mismatch", fragment.leading_id());
            return Absorbed::ChecksumMismatch;
        }

        let id = fragment.leading_id();
        self.outstanding.retain(|&expected| expected != id);
        self.collected.insert(id, fragment);
        trace!("Stored fragment 0x{:02X}, {} outstanding", id, self.outstanding.len());

        if self.is_complete() {
            Absorbed::Complete
        } else {
            Absorbed::Incomplete
        }
    }

    /// Join collected payloads in schema order, cut to the assembled length
    ///
    /// Missing fragments are skipped, so the result is only meaningful once
    /// [`is_complete`](Self::is_complete) holds.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buffer: Vec<u8> = self
            .schema
            .fragment_ids
            .iter()
            .filter_map(|id| self.collected.get(id))
            .flat_map(|fragment| fragment.payload().iter().copied())
            .collect();

        buffer.truncate(self.schema.assembled_len);
        buffer
    }
}
