//! Device state navigation.
//!
//! A [`Device`] tracks which state its connection is in and moves it along
//! the shortest path of the [`DeviceStateGraph`]. Every hop is a short-lived
//! observer: it is subscribed before its command is written, answers the
//! interactive prompts of the edge, and resolves when the target prompt shows
//! up. The device only advances `current_state` after a confirmed hop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::RwLock;

use crate::config::{DEFAULT_TIMEOUT, NOT_CONNECTED, Topology};
use crate::connection::Connection;
use crate::device::{DeviceStateGraph, Hop};
use crate::error::{ConnectError, ObserverError};
use crate::events::Wait4Prompts;
use crate::observer::{LineContext, LineDispatch, LineHandler, StreamObserver};
use crate::publisher::Subscriber;
use crate::recording::{SessionEvent, SessionRecorder};

/// Observer driving one edge of the graph.
struct Transition {
    hop: Hop,
    graph: Arc<DeviceStateGraph>,
}

impl Transition {
    fn answer(&self, line: &str, ctx: &mut LineContext<'_, ()>) -> LineDispatch {
        match self.hop.responses.iter().find(|(pattern, _)| pattern.is_match(line)) {
            Some((pattern, reply)) => {
                debug!("{} -> {}: '{}' answered", self.hop.from, self.hop.to, pattern);
                ctx.sendline(reply.clone());
                LineDispatch::Claimed
            }
            None => LineDispatch::NotClaimed,
        }
    }

    fn check_prompts(&self, line: &str, ctx: &mut LineContext<'_, ()>) -> LineDispatch {
        let candidates = self.graph.match_prompts(line);
        if candidates.len() > 1 {
            ctx.fail(ObserverError::AmbiguousPrompt {
                line: line.to_string(),
                candidates: candidates.into_iter().map(str::to_string).collect(),
            });
            return LineDispatch::Claimed;
        }
        if self.hop.confirmation.is_match(line) {
            ctx.resolve(());
            return LineDispatch::Claimed;
        }
        LineDispatch::NotClaimed
    }
}

impl LineHandler for Transition {
    type Output = ();

    fn on_start(&mut self, ctx: &mut LineContext<'_, ()>) {
        ctx.sendline(self.hop.command.clone());
    }

    fn on_line(&mut self, line: &str, _is_full_line: bool, ctx: &mut LineContext<'_, ()>) -> LineDispatch {
        self.answer(line, ctx).or_else(|| self.check_prompts(line, ctx))
    }
}

/// A device reachable through one connection.
pub struct Device {
    name: String,
    graph: Arc<DeviceStateGraph>,
    connection: Arc<dyn Connection>,
    current: RwLock<String>,
    navigation: tokio::sync::Mutex<()>,
    recorder: Option<Arc<SessionRecorder>>,
}

impl Device {
    /// A device in [`NOT_CONNECTED`] state.
    pub fn new(name: impl Into<String>, graph: DeviceStateGraph, connection: Arc<dyn Connection>) -> Self {
        Self {
            name: name.into(),
            graph: Arc::new(graph),
            connection,
            current: RwLock::new(NOT_CONNECTED.to_string()),
            navigation: tokio::sync::Mutex::new(()),
            recorder: None,
        }
    }

    pub fn from_topology(
        name: impl Into<String>,
        topology: Topology,
        connection: Arc<dyn Connection>,
    ) -> Result<Self, ConnectError> {
        Ok(Self::new(name, DeviceStateGraph::new(topology)?, connection))
    }

    /// Records the session: every chunk received on the connection plus the
    /// state changes of this device.
    pub fn with_recorder(mut self, recorder: Arc<SessionRecorder>) -> Self {
        recorder.attach(self.connection.bus());
        self.recorder = Some(recorder);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &DeviceStateGraph {
        &self.graph
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn recorder(&self) -> Option<&Arc<SessionRecorder>> {
        self.recorder.as_ref()
    }

    pub fn current_state(&self) -> String {
        self.current.read().clone()
    }

    /// Overrides the tracked state without touching the device.
    ///
    /// Only known states and [`NOT_CONNECTED`] are accepted.
    pub fn set_current_state(&self, state: &str) -> Result<(), ConnectError> {
        if state != NOT_CONNECTED && !self.graph.contains(state) {
            return Err(ConnectError::TargetStateNotExistError(state.to_string()));
        }
        self.change_state(state);
        Ok(())
    }

    fn change_state(&self, state: &str) {
        let from = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, state.to_string())
        };
        if from != state {
            info!("{}: state '{}' -> '{}'", self.name, from, state);
            self.record(SessionEvent::StateChanged {
                from,
                to: state.to_string(),
            });
        }
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = &self.recorder {
            recorder.record_event(event);
        }
    }

    fn lock_navigation(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ConnectError> {
        self.navigation
            .try_lock()
            .map_err(|_| ConnectError::NavigationInProgress(self.name.clone()))
    }

    /// Detects the state the connection is in.
    ///
    /// Sends an empty line and waits for the first known prompt, then returns
    /// the detected state.
    pub async fn establish(&self, timeout: Option<Duration>) -> Result<String, ConnectError> {
        let _guard = self.lock_navigation()?;
        let waiter = StreamObserver::start(
            format!("{}: wait for prompt", self.name),
            Wait4Prompts::for_graph(&self.graph, Some(1))?,
            self.connection.clone(),
            Some(timeout.unwrap_or(DEFAULT_TIMEOUT)),
        );
        self.connection.sendline("")?;

        let occurrences = waiter.await_result().await?;
        let state = occurrences
            .first()
            .map(|o| o.state.clone())
            .ok_or_else(|| ConnectError::InternalServerError("no prompt occurrence".to_string()))?;
        debug!("{}: established in '{}'", self.name, state);
        self.record(SessionEvent::ConnectionEstablished {
            connection: self.connection.name().to_string(),
            state: state.clone(),
        });
        self.change_state(&state);
        Ok(state)
    }

    /// Moves the device to `target` along the shortest path.
    ///
    /// Nothing is sent when the device already is in `target`. A second
    /// navigation started while one is running fails with
    /// [`ConnectError::NavigationInProgress`].
    pub async fn goto_state(&self, target: &str) -> Result<(), ConnectError> {
        let _guard = self.lock_navigation()?;
        let from = self.current_state();
        let path = self.graph.find_path(&from, target)?;
        if path.is_empty() {
            debug!("{}: already in '{}'", self.name, target);
            return Ok(());
        }

        for hop in path {
            debug!("{}: '{}' -> '{}' with {:?}", self.name, hop.from, hop.to, hop.command);
            let name = format!("{}: {} -> {}", self.name, hop.from, hop.to);
            let timeout = hop.timeout;
            let to = hop.to.clone();
            let transition = StreamObserver::start(
                name,
                Transition {
                    hop,
                    graph: self.graph.clone(),
                },
                self.connection.clone(),
                Some(timeout),
            );

            if let Err(cause) = transition.await_result().await {
                self.record(SessionEvent::NavigationFailed {
                    from: from.clone(),
                    to: target.to_string(),
                    reason: cause.to_string(),
                });
                return Err(ConnectError::NavigationFailed {
                    from,
                    to: target.to_string(),
                    source: Box::new(cause.into()),
                });
            }
            self.change_state(&to);
        }
        Ok(())
    }

    /// Stops recording the connection's chunks.
    pub fn detach_recorder(&self) -> bool {
        match &self.recorder {
            Some(recorder) => self
                .connection
                .bus()
                .unsubscribe_key(Subscriber::<str>::callable(recorder).key()),
            None => false,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("connection", &self.connection.name())
            .field("current_state", &self.current_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FifoConnection;
    use crate::recording::SessionRecordLevel;

    fn topology() -> Topology {
        Topology::new()
            .state("USER", r"^user>\s*$")
            .state("ADMIN", r"^admin#\s*$")
            .edge("USER", "ADMIN", "enable")
            .edge("ADMIN", "USER", "disable")
            .respond_on("USER", "ADMIN", r"Password:", "secret")
            .expect("edge exists")
    }

    /// Answers like a shell with a password-protected admin mode.
    fn responder(sent: &str) -> Option<String> {
        match sent {
            "\n" => Some("\nuser> ".to_string()),
            "enable\n" => Some("enable\nPassword: ".to_string()),
            "secret\n" => Some("\nadmin# ".to_string()),
            "disable\n" => Some("disable\nuser> ".to_string()),
            _ => None,
        }
    }

    fn device(connection: Arc<FifoConnection>) -> Device {
        Device::from_topology("router", topology(), connection).expect("valid topology")
    }

    #[tokio::test]
    async fn establish_detects_initial_state() {
        let conn = Arc::new(FifoConnection::with_responder("fifo", responder));
        let device = device(conn.clone());
        assert_eq!(device.current_state(), NOT_CONNECTED);

        let state = device.establish(None).await.expect("prompt detected");

        assert_eq!(state, "USER");
        assert_eq!(device.current_state(), "USER");
        assert_eq!(conn.sent(), vec!["\n".to_string()]);
    }

    #[tokio::test]
    async fn goto_state_answers_password_and_confirms_target() {
        let conn = Arc::new(FifoConnection::with_responder("fifo", responder));
        let device = device(conn.clone());
        device.set_current_state("USER").expect("known state");

        device.goto_state("ADMIN").await.expect("navigation");

        assert_eq!(device.current_state(), "ADMIN");
        assert_eq!(conn.sent(), vec!["enable\n".to_string(), "secret\n".to_string()]);
        assert!(conn.bus().is_empty());
    }

    #[tokio::test]
    async fn goto_current_state_sends_nothing() {
        let conn = Arc::new(FifoConnection::with_responder("fifo", responder));
        let device = device(conn.clone());
        device.set_current_state("ADMIN").expect("known state");

        device.goto_state("ADMIN").await.expect("no-op");

        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_before_sending() {
        let conn = Arc::new(FifoConnection::with_responder("fifo", responder));
        let device = device(conn.clone());
        device.set_current_state("USER").expect("known state");

        let err = device.goto_state("MISSING").await.expect_err("unknown");

        assert!(matches!(err, ConnectError::TargetStateNotExistError(_)));
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn navigation_from_not_connected_is_unreachable() {
        let conn = Arc::new(FifoConnection::new("fifo"));
        let device = device(conn);

        let err = device.goto_state("USER").await.expect_err("not connected");
        assert!(matches!(err, ConnectError::UnreachableState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_hop_fails_with_timeout() {
        let topology = Topology::new()
            .state("USER", r"^user>\s*$")
            .state("ADMIN", r"^admin#\s*$")
            .with_edge(crate::config::StateEdge::new("USER", "ADMIN", "enable").timeout_secs(2));
        let conn = Arc::new(FifoConnection::new("fifo"));
        let device = Device::from_topology("router", topology, conn).expect("valid");
        device.set_current_state("USER").expect("known state");

        let err = device.goto_state("ADMIN").await.expect_err("no answer");

        match &err {
            ConnectError::NavigationFailed { from, to, .. } => {
                assert_eq!(from, "USER");
                assert_eq!(to, "ADMIN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.observer_cause(), Some(ObserverError::Timeout { .. })));
        assert_eq!(device.current_state(), "USER");
    }

    #[tokio::test]
    async fn recorder_sees_chunks_and_state_changes() {
        let conn = Arc::new(FifoConnection::with_responder("fifo", responder));
        let recorder = Arc::new(SessionRecorder::new(SessionRecordLevel::Full));
        let device = device(conn.clone()).with_recorder(recorder.clone());

        device.establish(None).await.expect("established");
        device.goto_state("ADMIN").await.expect("navigation");
        device.goto_state("USER").await.expect("navigation");

        let states = recorder
            .entries()
            .into_iter()
            .filter_map(|e| match e.event {
                SessionEvent::StateChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                (NOT_CONNECTED.to_string(), "USER".to_string()),
                ("USER".to_string(), "ADMIN".to_string()),
                ("ADMIN".to_string(), "USER".to_string()),
            ]
        );
        assert!(recorder
            .entries()
            .iter()
            .any(|e| matches!(e.event, SessionEvent::RawChunk { .. })));

        let key = Subscriber::<str>::callable(&recorder).key();
        assert!(device.detach_recorder());
        assert!(!conn.bus().is_subscribed(key));
    }
}
