//! Session recording and offline replay.
//!
//! A [`SessionRecorder`] subscribes to a connection's bus and keeps every
//! received chunk, together with the state changes reported by the navigator.
//! Recordings export to JSONL. A [`SessionReplayer`] publishes the recorded
//! chunks into another bus so that observers can be exercised against a real
//! session without the device.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::publisher::{NotificationBus, OnData, Subscriber, SubscriberResult};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub keep_raw_chunks: bool,
    pub keep_state_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_state_changed: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The initial state was detected on `connection`.
    ConnectionEstablished { connection: String, state: String },
    StateChanged { from: String, to: String },
    NavigationFailed { from: String, to: String, reason: String },
    /// Data as received from the device.
    RawChunk { data: String },
}

/// In-memory session recorder.
///
/// Attach it to a bus with [`SessionRecorder::attach`]; the bus only holds it
/// weakly, so keep the `Arc` for as long as the recording should run.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Mutex<Vec<SessionRecordEntry>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Subscribes the recorder to `bus` so that every chunk gets recorded.
    pub fn attach(self: &Arc<Self>, bus: &NotificationBus<str>) -> bool {
        bus.subscribe(Subscriber::callable(self))
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) {
        if self.level == SessionRecordLevel::Off {
            return;
        }
        self.entries.lock().push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: &str) {
        if self.level != SessionRecordLevel::Full {
            return;
        }
        self.record_event(SessionEvent::RawChunk {
            data: data.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<SessionRecordEntry> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        entries_to_jsonl(&self.entries())
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        *recorder.entries.lock() = parse_jsonl(jsonl)?;
        Ok(recorder)
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp (ties keep their recorded order) and the
    /// event kinds disabled in `options` are dropped.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let mut indexed = parse_jsonl(jsonl)?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RawChunk { .. } if !options.keep_raw_chunks => None,
                SessionEvent::StateChanged { .. } if !options.keep_state_changed => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        entries_to_jsonl(&filtered)
    }
}

impl OnData<str> for SessionRecorder {
    fn on_data(&self, data: &str) -> SubscriberResult {
        self.record_raw_chunk(data);
        Ok(())
    }
}

fn entries_to_jsonl(entries: &[SessionRecordEntry]) -> Result<String, ConnectError> {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| ConnectError::InternalServerError(format!("record encode error: {e}")))?;
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn parse_jsonl(jsonl: &str) -> Result<Vec<SessionRecordEntry>, ConnectError> {
    jsonl
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| ConnectError::InternalServerError(format!("record decode error: {e}")))
        })
        .collect()
}

/// Offline replayer backed by session recording data.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        Self {
            entries: recorder.entries(),
            cursor: 0,
        }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            entries: parse_jsonl(jsonl)?,
            cursor: 0,
        })
    }

    /// State detected when the recorded session was established.
    pub fn initial_state(&self) -> Option<&str> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished { state, .. } => Some(state.as_str()),
            _ => None,
        })
    }

    /// Recorded `(from, to)` state changes, in order.
    pub fn state_changes(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::StateChanged { from, to } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    /// Publishes the next recorded chunk into `bus`.
    ///
    /// Fails with [`ConnectError::ReplayMismatchError`] once the recording has
    /// no chunk left.
    pub fn replay_next_chunk(&mut self, bus: &NotificationBus<str>) -> Result<(), ConnectError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;
            if let SessionEvent::RawChunk { data } = &entry.event {
                trace!("replaying chunk {data:?} into {}", bus.name());
                bus.notify(data.as_str());
                return Ok(());
            }
        }
        Err(ConnectError::ReplayMismatchError(
            "no recorded chunk left to replay".to_string(),
        ))
    }

    /// Publishes every remaining recorded chunk into `bus`, returns how many
    /// were published.
    pub fn replay_into(&mut self, bus: &NotificationBus<str>) -> usize {
        let mut count = 0;
        while self.replay_next_chunk(bus).is_ok() {
            count += 1;
        }
        count
    }

    /// Checks that the recording went through `expected` state changes.
    pub fn expect_state_changes(&self, expected: &[(&str, &str)]) -> Result<(), ConnectError> {
        let recorded = self.state_changes();
        let matches = recorded.len() == expected.len()
            && recorded
                .iter()
                .zip(expected)
                .all(|((from, to), (exp_from, exp_to))| from == exp_from && to == exp_to);
        if matches {
            Ok(())
        } else {
            Err(ConnectError::ReplayMismatchError(format!(
                "expected state changes {expected:?}, recorded {recorded:?}"
            )))
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISY_FIXTURE: &str = r#"{"ts_ms":3,"event":{"kind":"raw_chunk","data":"chunk-2"}}
{"ts_ms":1,"event":{"kind":"connection_established","connection":"fifo","state":"UNIX_LOCAL"}}
{"ts_ms":2,"event":{"kind":"raw_chunk","data":"chunk-1"}}
{"ts_ms":4,"event":{"kind":"state_changed","from":"UNIX_LOCAL","to":"UNIX_LOCAL_ROOT"}}
"#;

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder.record_event(SessionEvent::StateChanged {
            from: "A".to_string(),
            to: "B".to_string(),
        });

        let jsonl = recorder.to_jsonl().expect("encode jsonl");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode jsonl");

        assert_eq!(restored.entries(), recorder.entries());
    }

    #[test]
    fn attached_recorder_records_bus_chunks() {
        let bus = NotificationBus::<str>::new("fifo");
        let recorder = Arc::new(SessionRecorder::default());
        assert!(recorder.attach(&bus));

        bus.notify("local$ ");
        bus.notify("ls\n");

        let chunks = recorder
            .entries()
            .into_iter()
            .map(|e| e.event)
            .collect::<Vec<_>>();
        assert_eq!(
            chunks,
            vec![
                SessionEvent::RawChunk {
                    data: "local$ ".to_string()
                },
                SessionEvent::RawChunk {
                    data: "ls\n".to_string()
                },
            ]
        );
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);

        recorder.record_raw_chunk("raw-shell-data");
        recorder.record_event(SessionEvent::StateChanged {
            from: "A".to_string(),
            to: "B".to_string(),
        });

        let entries = recorder.entries();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].event, SessionEvent::StateChanged { .. }));
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder.record_event(SessionEvent::StateChanged {
            from: "A".to_string(),
            to: "B".to_string(),
        });
        recorder.record_raw_chunk("raw-shell-data");
        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn from_jsonl_accepts_empty_input() {
        let restored = SessionRecorder::from_jsonl("").expect("decode empty jsonl");
        assert!(restored.entries().is_empty());
    }

    #[test]
    fn from_jsonl_rejects_garbage() {
        let err = SessionRecorder::from_jsonl("not json").expect_err("garbage");
        assert!(matches!(err, ConnectError::InternalServerError(_)));
    }

    #[test]
    fn normalize_jsonl_filters_noise_and_sorts_by_timestamp() {
        let normalized = SessionRecorder::normalize_jsonl(NOISY_FIXTURE, NormalizeOptions::default())
            .expect("normalize");
        let entries = SessionRecorder::from_jsonl(&normalized)
            .expect("restore normalized")
            .entries();

        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[0].event,
            SessionEvent::ConnectionEstablished { .. }
        ));
        assert!(matches!(entries[1].event, SessionEvent::StateChanged { .. }));
    }

    #[test]
    fn normalize_jsonl_can_keep_raw_chunks() {
        let options = NormalizeOptions {
            keep_raw_chunks: true,
            keep_state_changed: true,
        };
        let normalized = SessionRecorder::normalize_jsonl(NOISY_FIXTURE, options).expect("normalize");
        let replayer = SessionReplayer::from_jsonl(&normalized).expect("replayer");

        let bus = NotificationBus::<str>::new("replay");
        let recorder = Arc::new(SessionRecorder::default());
        recorder.attach(&bus);
        let mut replayer = replayer;
        assert_eq!(replayer.replay_into(&bus), 2);

        let replayed = recorder
            .entries()
            .into_iter()
            .filter_map(|e| match e.event {
                SessionEvent::RawChunk { data } => Some(data),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(replayed, vec!["chunk-1".to_string(), "chunk-2".to_string()]);
    }

    #[test]
    fn replayer_reports_exhaustion_as_mismatch() {
        let mut replayer = SessionReplayer::from_jsonl(NOISY_FIXTURE).expect("replayer");
        let bus = NotificationBus::<str>::new("replay");
        replayer.replay_next_chunk(&bus).expect("first chunk");
        replayer.replay_next_chunk(&bus).expect("second chunk");

        let err = replayer.replay_next_chunk(&bus).expect_err("exhausted");
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
    }

    #[test]
    fn replayer_exposes_initial_state_and_transitions() {
        let replayer = SessionReplayer::from_jsonl(NOISY_FIXTURE).expect("replayer");

        assert_eq!(replayer.initial_state(), Some("UNIX_LOCAL"));
        replayer
            .expect_state_changes(&[("UNIX_LOCAL", "UNIX_LOCAL_ROOT")])
            .expect("recorded path");
        assert!(matches!(
            replayer.expect_state_changes(&[]),
            Err(ConnectError::ReplayMismatchError(_))
        ));
    }
}
