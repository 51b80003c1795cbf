//! Structured simulation event logging.
//!
//! Every record is a `(simulated_timestamp, node_id, level, event_kind,
//! payload)` tuple, serialized as one JSON line. Sinks are shared across
//! nodes and internally serialized; a sink must never block the scheduler,
//! so the file-backed sink used by the runner buffers through a bounded
//! channel and drops on overflow.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::time::{SimClock, SimTime};
use crate::NodeId;

/// Per-node log verbosity, from the scenario file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Logic,
    All,
}

/// Stable enumeration of simulation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    BeaconSent,
    PacketTx,
    PacketRx,
    PacketDrop,
    EnergyConsumed,
    ImageTaken,
    PassStart,
    PassEnd,
    ComputeEnqueued,
    ComputeCompleted,
}

/// One line of the simulation event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Simulated wall-clock timestamp (`YYYY-MM-DD HH:MM:SS`).
    pub timestamp: String,
    /// Simulated offset in seconds, for cheap numeric post-processing.
    pub sim_time_s: f64,
    pub node_id: NodeId,
    pub level: LogLevel,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

/// Destination for simulation event records.
///
/// Implementations are shared between nodes and must serialize internally.
/// Writes are best-effort: a saturated sink drops the record.
pub trait LogSink: Send + Sync {
    fn write(&self, record: LogRecord);
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _record: LogRecord) {}
}

/// In-memory sink for tests and the runtime API.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Copy out everything written so far.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records of one kind, in write order.
    pub fn of_kind(&self, kind: EventKind) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Line-oriented JSON sink over any writer. Used directly in tests; the
/// runner wraps it behind a bounded channel for file output.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> JsonLinesSink<W> {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> LogSink for JsonLinesSink<W> {
    fn write(&self, record: LogRecord) {
        if let Ok(line) = serde_json::to_string(&record) {
            let mut writer = self.writer.lock();
            // Best effort: a failing writer must not stall the simulation.
            let _ = writeln!(writer, "{line}");
        }
    }
}

/// Per-node handle that stamps, filters, and forwards records.
#[derive(Clone)]
pub struct NodeLogger {
    node_id: NodeId,
    level: LogLevel,
    clock: SimClock,
    sink: Arc<dyn LogSink>,
}

impl NodeLogger {
    pub fn new(node_id: NodeId, level: LogLevel, clock: SimClock, sink: Arc<dyn LogSink>) -> Self {
        NodeLogger {
            node_id,
            level,
            clock,
            sink,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Emit an event record at `Info`.
    pub fn event(&self, t: SimTime, kind: EventKind, payload: serde_json::Value) {
        self.event_at(LogLevel::Info, t, kind, payload);
    }

    /// Emit an event record at an explicit level.
    pub fn event_at(&self, level: LogLevel, t: SimTime, kind: EventKind, payload: serde_json::Value) {
        if level > self.level {
            return;
        }
        self.sink.write(LogRecord {
            timestamp: self.clock.format_of(t),
            sim_time_s: t.as_secs_f64(),
            node_id: self.node_id,
            level,
            kind,
            payload,
        });
    }
}
