//! Log-sink construction and the buffered file sink.
//!
//! The scenario's `simlogsetup` names a handler; the runner maps it to a
//! concrete sink. File output goes through a bounded channel to a writer
//! thread: a saturated channel drops records rather than stalling the
//! scheduler.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use orbsim_common::{LogRecord, LogSink, MemorySink, NullSink};
use orbsim_scenario::{ConfigError, LogSetupDoc};
use parking_lot::Mutex;

/// Bound on buffered records before the sink starts dropping.
const SINK_QUEUE_DEPTH: usize = 8_192;

/// Best-effort asynchronous JSON-lines sink over a writer thread.
pub struct ThreadedJsonSink {
    tx: Option<mpsc::SyncSender<LogRecord>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedJsonSink {
    pub fn new(writer: Box<dyn Write + Send>) -> ThreadedJsonSink {
        let (tx, rx) = mpsc::sync_channel::<LogRecord>(SINK_QUEUE_DEPTH);
        let worker = std::thread::Builder::new()
            .name("orbsim-log-sink".to_string())
            .spawn(move || {
                let mut writer = BufWriter::new(writer);
                while let Ok(record) = rx.recv() {
                    if let Ok(line) = serde_json::to_string(&record) {
                        let _ = writeln!(writer, "{line}");
                    }
                }
                let _ = writer.flush();
            })
            .expect("failed to spawn log sink thread");
        ThreadedJsonSink {
            tx: Some(tx),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl LogSink for ThreadedJsonSink {
    fn write(&self, record: LogRecord) {
        if let Some(tx) = &self.tx {
            // Drop on back-pressure; the scheduler never waits on logging.
            let _ = tx.try_send(record);
        }
    }
}

impl Drop for ThreadedJsonSink {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and flush.
        self.tx.take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Build the sink named by the scenario's `simlogsetup`.
///
/// Handlers: `file` (requires `logfile`), `stdout`, `memory`, `none`.
pub fn sink_from_setup(setup: &LogSetupDoc) -> Result<Arc<dyn LogSink>, ConfigError> {
    match setup.loghandler.as_str() {
        "none" | "null" => Ok(Arc::new(NullSink)),
        "memory" => Ok(Arc::new(MemorySink::new())),
        "stdout" => Ok(Arc::new(ThreadedJsonSink::new(Box::new(std::io::stdout())))),
        "file" => {
            let path = setup
                .extra
                .get("logfile")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ConfigError::ScenarioIo {
                    path: "simlogsetup".to_string(),
                    reason: "file handler requires a \"logfile\" key".to_string(),
                })?;
            let file = File::create(path).map_err(|e| ConfigError::ScenarioIo {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Arc::new(ThreadedJsonSink::new(Box::new(file))))
        }
        other => Err(ConfigError::UnknownLogHandler {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbsim_common::{EventKind, LogLevel, NodeId};

    fn record() -> LogRecord {
        LogRecord {
            timestamp: "2022-10-17 12:00:00".to_string(),
            sim_time_s: 0.0,
            node_id: NodeId(1),
            level: LogLevel::Info,
            kind: EventKind::PacketTx,
            payload: serde_json::json!({"frame": "beacon"}),
        }
    }

    #[test]
    fn threaded_sink_writes_json_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let sink = ThreadedJsonSink::new(Box::new(File::create(&path).unwrap()));
            sink.write(record());
            sink.write(record());
            // Drop flushes.
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let parsed: LogRecord = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.kind, EventKind::PacketTx);
    }

    #[test]
    fn handler_names_resolve() {
        let setup = |handler: &str, extra: serde_json::Value| LogSetupDoc {
            loghandler: handler.to_string(),
            extra: extra.as_object().cloned().unwrap_or_default(),
        };
        assert!(sink_from_setup(&setup("none", serde_json::json!({}))).is_ok());
        assert!(sink_from_setup(&setup("memory", serde_json::json!({}))).is_ok());
        assert!(sink_from_setup(&setup("carrier-pigeon", serde_json::json!({}))).is_err());
        // File without a path is a config error.
        assert!(sink_from_setup(&setup("file", serde_json::json!({}))).is_err());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        assert!(sink_from_setup(&setup(
            "file",
            serde_json::json!({"logfile": path.to_str().unwrap()})
        ))
        .is_ok());
    }
}
