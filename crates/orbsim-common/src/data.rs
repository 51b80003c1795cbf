//! Application data units and MAC frames.
//!
//! A [`DataUnit`] is the payload the network exists to move: a sensor
//! reading or a captured image. A [`MacFrame`] is what radios actually
//! carry; the MAC state machines wrap data units in frames and unwrap them
//! on the far side.

use serde::{Deserialize, Serialize};

use crate::time::SimTime;
use crate::{NodeId, RadioId};

/// What a data unit holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataKind {
    Sensor,
    Image,
}

/// An application payload produced by a generator or imager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUnit {
    /// Unique id (`node_id << 32 | sequence` by convention).
    pub id: u64,
    pub kind: DataKind,
    pub size_bytes: u64,
    pub created_at: SimTime,
    pub source_node: NodeId,
}

impl DataUnit {
    /// Compose a scenario-unique data id from its producer and a counter.
    pub fn compose_id(node: NodeId, seq: u32) -> u64 {
        (node.0 as u64) << 32 | seq as u64
    }
}

/// A frame exchanged by radio models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "kebab-case")]
pub enum MacFrame {
    /// Periodic invitation from a satellite MAC.
    Beacon {
        /// Unique beacon id so receivers can discard stale beacons.
        beacon_id: u64,
        source_radio: RadioId,
    },
    /// Ground-station request for `num_packets` data frames.
    Request {
        source_radio: RadioId,
        dest_radio: RadioId,
        num_packets: u32,
        sequence: u32,
    },
    /// One data unit in flight.
    Data {
        /// Frame id, distinct from the payload's data id.
        frame_id: u64,
        source_radio: RadioId,
        /// None for broadcast uplink (IoT to whichever satellite hears it).
        dest_radio: Option<RadioId>,
        sequence: u32,
        payload: DataUnit,
    },
    /// Single-frame acknowledgment (IoT uplink path).
    Ack {
        source_radio: RadioId,
        dest_radio: RadioId,
        acked_frame_id: u64,
    },
    /// Bulk acknowledgment enumerating received data frame ids.
    BulkAck {
        source_radio: RadioId,
        dest_radio: RadioId,
        received_frame_ids: Vec<u64>,
    },
}

/// Fixed header cost of every frame (bytes).
const FRAME_HEADER_BYTES: u64 = 8;

impl MacFrame {
    /// Radio id of the transmitter that built the frame.
    pub fn source_radio(&self) -> RadioId {
        match self {
            MacFrame::Beacon { source_radio, .. }
            | MacFrame::Request { source_radio, .. }
            | MacFrame::Data { source_radio, .. }
            | MacFrame::Ack { source_radio, .. }
            | MacFrame::BulkAck { source_radio, .. } => *source_radio,
        }
    }

    /// Intended recipient, if the frame is addressed.
    pub fn dest_radio(&self) -> Option<RadioId> {
        match self {
            MacFrame::Beacon { .. } => None,
            MacFrame::Request { dest_radio, .. }
            | MacFrame::Ack { dest_radio, .. }
            | MacFrame::BulkAck { dest_radio, .. } => Some(*dest_radio),
            MacFrame::Data { dest_radio, .. } => *dest_radio,
        }
    }

    /// Serialized size used for airtime and budget accounting.
    pub fn size_bytes(&self) -> u64 {
        match self {
            MacFrame::Beacon { .. } => FRAME_HEADER_BYTES,
            MacFrame::Request { .. } => FRAME_HEADER_BYTES + 8,
            MacFrame::Ack { .. } => FRAME_HEADER_BYTES + 8,
            MacFrame::BulkAck {
                received_frame_ids, ..
            } => FRAME_HEADER_BYTES + 8 * received_frame_ids.len() as u64,
            MacFrame::Data { payload, .. } => FRAME_HEADER_BYTES + 4 + payload.size_bytes,
        }
    }

    pub fn size_bits(&self) -> u64 {
        self.size_bytes() * 8
    }

    /// Short label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            MacFrame::Beacon { .. } => "beacon",
            MacFrame::Request { .. } => "request",
            MacFrame::Data { .. } => "data",
            MacFrame::Ack { .. } => "ack",
            MacFrame::BulkAck { .. } => "bulk-ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_size_includes_payload() {
        let frame = MacFrame::Data {
            frame_id: 1,
            source_radio: RadioId(4),
            dest_radio: None,
            sequence: 0,
            payload: DataUnit {
                id: DataUnit::compose_id(NodeId(9), 1),
                kind: DataKind::Sensor,
                size_bytes: 100,
                created_at: SimTime::ZERO,
                source_node: NodeId(9),
            },
        };
        assert_eq!(frame.size_bytes(), 112);
        assert_eq!(frame.size_bits(), 896);
    }

    #[test]
    fn composed_ids_are_unique_per_node_and_sequence() {
        let a = DataUnit::compose_id(NodeId(1), 1);
        let b = DataUnit::compose_id(NodeId(1), 2);
        let c = DataUnit::compose_id(NodeId(2), 1);
        assert!(a != b && a != c && b != c);
    }

    #[test]
    fn bulk_ack_grows_with_id_count() {
        let small = MacFrame::BulkAck {
            source_radio: RadioId(1),
            dest_radio: RadioId(2),
            received_frame_ids: vec![1],
        };
        let large = MacFrame::BulkAck {
            source_radio: RadioId(1),
            dest_radio: RadioId(2),
            received_frame_ids: (0..10).collect(),
        };
        assert!(large.size_bytes() > small.size_bytes());
    }
}
