//! Incremental line parsing contract shared by every command and event.
//!
//! A [`StreamObserver`] subscribes to a connection's bus when it starts, cuts
//! the incoming chunks into lines and hands every line to its [`LineHandler`]:
//!
//! 1. [`LineHandler::on_line`] runs the specialized matchers in priority order.
//!    The first matcher recognizing the line does its work and answers
//!    [`LineDispatch::Claimed`].
//! 2. Only when nothing claimed the line, [`LineHandler::on_unclaimed`] runs the
//!    generic handling (for instance end-of-command prompt detection).
//!
//! The unterminated tail of the stream is dispatched with
//! `is_full_line == false` every time it grows. Once an invocation for a
//! physical line has been claimed, the following invocations for the same line
//! (its further growth and its final newline-terminated form) are skipped, so a
//! matcher answering a partial `Password:` prompt fires once.
//!
//! The observer ends exactly once, by resolution, failure, timeout or
//! cancellation, and unsubscribes itself from the bus when it does.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::trace;
use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::ObserverError;
use crate::helpers;
use crate::publisher::{OnData, Subscriber, SubscriberKey, SubscriberResult};

mod buffer;
mod outcome;

pub use buffer::{LineBuffer, RawLine};
pub use outcome::{ObserverCore, Outcome};

/// Answer of a matcher for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDispatch {
    /// The line was fully handled, default handling must not run.
    Claimed,
    NotClaimed,
}

impl LineDispatch {
    pub fn is_claimed(self) -> bool {
        self == LineDispatch::Claimed
    }

    /// Runs `next` only if this matcher did not claim the line.
    pub fn or_else(self, next: impl FnOnce() -> LineDispatch) -> LineDispatch {
        match self {
            LineDispatch::Claimed => LineDispatch::Claimed,
            LineDispatch::NotClaimed => next(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outgoing {
    Raw(String),
    Line(String),
}

/// What a line hook may do besides parsing.
///
/// Writes are queued and flushed once the hook returned, so replies never run
/// while the observer's parsing state is locked.
pub struct LineContext<'a, T> {
    core: &'a ObserverCore<T>,
    outbox: &'a mut Vec<Outgoing>,
}

impl<'a, T: Clone + Send + Sync + 'static> LineContext<'a, T> {
    fn new(core: &'a ObserverCore<T>, outbox: &'a mut Vec<Outgoing>) -> Self {
        Self { core, outbox }
    }

    /// Writes raw data to the connection.
    pub fn send(&mut self, data: impl Into<String>) {
        self.outbox.push(Outgoing::Raw(data.into()));
    }

    /// Writes a newline-terminated line to the connection.
    pub fn sendline(&mut self, line: impl Into<String>) {
        self.outbox.push(Outgoing::Line(line.into()));
    }

    pub fn resolve(&self, value: T) -> bool {
        self.core.resolve(value)
    }

    pub fn fail(&self, cause: ObserverError) -> bool {
        self.core.fail(cause)
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn elapsed(&self) -> Duration {
        self.core.elapsed()
    }
}

/// Per-line behavior of an observer.
pub trait LineHandler: Send + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Specialized matchers, tried in a fixed priority order.
    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch;

    /// Generic handling for lines no matcher claimed.
    fn on_unclaimed(
        &mut self,
        _line: &str,
        _is_full_line: bool,
        _ctx: &mut LineContext<'_, Self::Output>,
    ) {
    }

    /// Called once, right after the observer subscribed to its bus.
    fn on_start(&mut self, _ctx: &mut LineContext<'_, Self::Output>) {}

    /// When `true`, partial lines are never dispatched.
    fn full_lines_only(&self) -> bool {
        false
    }

    /// Cleanup applied before dispatch.
    fn decode_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        helpers::clean_line(line)
    }
}

struct ParseState<H> {
    buffer: LineBuffer,
    handler: H,
    partial_claimed: bool,
}

/// One in-flight command or event bound to a connection.
pub struct StreamObserver<H: LineHandler> {
    name: String,
    core: ObserverCore<H::Output>,
    state: Mutex<ParseState<H>>,
    connection: Arc<dyn Connection>,
    unsubscribed: AtomicBool,
    me: Weak<Self>,
}

impl<H: LineHandler> StreamObserver<H> {
    /// Subscribes a new observer to the connection's bus and runs its start hook.
    ///
    /// The returned `Arc` is the only strong owner; dropping it makes the bus
    /// forget the observer.
    pub fn start(
        name: impl Into<String>,
        handler: H,
        connection: Arc<dyn Connection>,
        timeout: Option<Duration>,
    ) -> Arc<Self> {
        let observer = Arc::new_cyclic(|me| Self {
            name: name.into(),
            core: ObserverCore::new(timeout),
            state: Mutex::new(ParseState {
                buffer: LineBuffer::new(),
                handler,
                partial_claimed: false,
            }),
            connection,
            unsubscribed: AtomicBool::new(false),
            me: me.clone(),
        });
        trace!("{}: start on {}", observer.name, observer.connection.name());
        observer
            .connection
            .bus()
            .subscribe(Subscriber::callable(&observer));

        let mut outbox = Vec::new();
        {
            let mut state = observer.state.lock();
            let mut ctx = LineContext::new(&observer.core, &mut outbox);
            state.handler.on_start(&mut ctx);
        }
        observer.flush(outbox);
        observer.finish_if_done();
        observer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Feeds a chunk of connection data.
    pub fn feed(&self, chunk: &str) {
        if self.core.is_done() {
            return;
        }
        if self.check_cancelled() || self.core.check_deadline() {
            self.finish_if_done();
            return;
        }

        let mut outbox = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for raw in state.buffer.feed(chunk) {
                if self.core.is_done() {
                    break;
                }
                if !raw.is_full_line && state.handler.full_lines_only() {
                    continue;
                }
                let claimed_earlier = state.partial_claimed;
                if raw.is_full_line {
                    state.partial_claimed = false;
                }
                if claimed_earlier {
                    trace!("{}: line already claimed: {:?}", self.name, raw.text);
                    continue;
                }

                let line = state.handler.decode_line(&raw.text);
                trace!("{}: line {:?} full={}", self.name, line, raw.is_full_line);
                let mut ctx = LineContext::new(&self.core, &mut outbox);
                match state.handler.on_line(&line, raw.is_full_line, &mut ctx) {
                    LineDispatch::Claimed => {
                        if !raw.is_full_line {
                            state.partial_claimed = true;
                        }
                    }
                    LineDispatch::NotClaimed => {
                        state.handler.on_unclaimed(&line, raw.is_full_line, &mut ctx);
                    }
                }
            }
        }

        self.flush(outbox);
        self.check_cancelled();
        self.finish_if_done();
    }

    fn flush(&self, outbox: Vec<Outgoing>) {
        for item in outbox {
            let written = match &item {
                Outgoing::Raw(data) => self.connection.send(data),
                Outgoing::Line(line) => self.connection.sendline(line),
            };
            if let Err(err) = written {
                self.core.fail(ObserverError::Connection(err.to_string()));
                break;
            }
        }
    }

    fn check_cancelled(&self) -> bool {
        if self.core.cancel_requested() {
            self.core.fail(ObserverError::Cancelled);
            return true;
        }
        false
    }

    fn finish_if_done(&self) {
        if self.core.is_done() && !self.unsubscribed.swap(true, Ordering::SeqCst) {
            trace!("{}: finished {:?}", self.name, self.core.elapsed());
            self.connection
                .bus()
                .unsubscribe_key(SubscriberKey::callable_of(self));
        }
    }

    /// Terminal success, idempotent.
    pub fn resolve(&self, value: H::Output) -> bool {
        let changed = self.core.resolve(value);
        self.finish_if_done();
        changed
    }

    /// Terminal failure, idempotent.
    pub fn fail(&self, cause: ObserverError) -> bool {
        let changed = self.core.fail(cause);
        self.finish_if_done();
        changed
    }

    /// Requests cancellation.
    ///
    /// Takes effect immediately when no hook is running, otherwise as soon as
    /// the running hook returns.
    pub fn cancel(&self) {
        self.core.request_cancel();
        if let Some(guard) = self.state.try_lock() {
            drop(guard);
            self.check_cancelled();
            self.finish_if_done();
        }
    }

    /// Deadline counted from the observer creation.
    pub fn set_timeout(&self, timeout: Duration) {
        self.core.set_timeout(timeout);
    }

    /// Timer tick: applies the deadline and a pending cancellation.
    pub fn tick(&self) {
        self.core.check_deadline();
        self.check_cancelled();
        self.finish_if_done();
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    pub fn elapsed(&self) -> Duration {
        self.core.elapsed()
    }

    pub fn outcome(&self) -> Outcome<H::Output> {
        self.core.outcome()
    }

    /// Non-blocking snapshot, `None` while pending.
    pub fn result(&self) -> Option<Result<H::Output, ObserverError>> {
        self.core.outcome().into_result()
    }

    /// Suspends until the observer ends or its deadline passes.
    pub async fn await_result(&self) -> Result<H::Output, ObserverError> {
        let outcome = self.core.wait().await;
        self.finish_if_done();
        outcome.into_result().unwrap_or(Err(ObserverError::Timeout {
            elapsed: self.core.elapsed(),
        }))
    }

    /// Read access to the handler, for inspection.
    pub fn with_handler<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.state.lock().handler)
    }

    /// A new strong handle, if the owner still exists.
    pub fn handle(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }
}

impl<H: LineHandler> OnData<str> for StreamObserver<H> {
    fn on_data(&self, data: &str) -> SubscriberResult {
        self.feed(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FifoConnection;

    /// Records every dispatch, claims lines starting with `!`, answers
    /// `Password:` once.
    #[derive(Default)]
    struct Probe {
        seen: Vec<(String, bool)>,
        defaults: Vec<String>,
    }

    impl Probe {
        fn password(&mut self, line: &str, ctx: &mut LineContext<'_, usize>) -> LineDispatch {
            if line.contains("Password:") {
                ctx.sendline("secret");
                return LineDispatch::Claimed;
            }
            LineDispatch::NotClaimed
        }

        fn bang(&mut self, line: &str) -> LineDispatch {
            if line.starts_with('!') {
                return LineDispatch::Claimed;
            }
            LineDispatch::NotClaimed
        }
    }

    impl LineHandler for Probe {
        type Output = usize;

        fn on_line(
            &mut self,
            line: &str,
            is_full_line: bool,
            ctx: &mut LineContext<'_, usize>,
        ) -> LineDispatch {
            self.seen.push((line.to_string(), is_full_line));
            self.password(line, ctx).or_else(|| self.bang(line))
        }

        fn on_unclaimed(&mut self, line: &str, is_full_line: bool, ctx: &mut LineContext<'_, usize>) {
            if is_full_line {
                self.defaults.push(line.to_string());
            }
            if line == "done" {
                ctx.resolve(self.defaults.len());
            }
        }
    }

    fn connection() -> Arc<FifoConnection> {
        Arc::new(FifoConnection::new("probe"))
    }

    #[test]
    fn feed_dispatches_full_and_partial_lines() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);

        conn.inject("abc");
        conn.inject("def\nline1\nline2\n");

        let seen = observer.with_handler(|p| p.seen.clone());
        assert_eq!(
            seen,
            vec![
                ("abc".to_string(), false),
                ("abcdef".to_string(), true),
                ("line1".to_string(), true),
                ("line2".to_string(), true),
            ]
        );
    }

    #[test]
    fn claimed_line_skips_default_handling() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);

        conn.inject("!special\nplain\n");

        assert_eq!(
            observer.with_handler(|p| p.defaults.clone()),
            vec!["plain".to_string()]
        );
    }

    #[test]
    fn claimed_partial_line_is_handled_once() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);

        conn.inject("Password:");
        conn.inject(" ");
        conn.inject("\nnext\n");

        assert_eq!(conn.sent(), vec!["secret\n".to_string()]);
        let seen = observer.with_handler(|p| p.seen.clone());
        assert_eq!(
            seen,
            vec![("Password:".to_string(), false), ("next".to_string(), true)]
        );
    }

    #[test]
    fn resolution_unsubscribes_and_is_final() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);

        conn.inject("a\ndone\n");
        assert_eq!(observer.result(), Some(Ok(2)));
        assert!(conn.bus().is_empty());

        assert!(!observer.fail(ObserverError::Cancelled));
        conn.inject("more\n");
        assert_eq!(observer.result(), Some(Ok(2)));
    }

    #[test]
    fn cancel_fails_with_cancellation_cause() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);

        observer.cancel();

        assert_eq!(observer.result(), Some(Err(ObserverError::Cancelled)));
        assert!(conn.bus().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let conn = connection();
        let observer = StreamObserver::start(
            "probe",
            Probe::default(),
            conn.clone(),
            Some(Duration::from_secs(3)),
        );

        let err = observer.await_result().await.expect_err("must time out");
        assert!(matches!(err, ObserverError::Timeout { .. }));
        assert!(conn.bus().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn data_after_the_deadline_does_not_resolve() {
        let conn = connection();
        let observer = StreamObserver::start(
            "probe",
            Probe::default(),
            conn.clone(),
            Some(Duration::from_secs(1)),
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        conn.inject("done\n");

        let err = observer.await_result().await.expect_err("deadline passed");
        assert!(matches!(err, ObserverError::Timeout { .. }));
        assert!(observer.with_handler(|p| p.seen.is_empty()));
        assert!(conn.bus().is_empty());
    }

    #[test]
    fn dropped_observer_is_forgotten_by_the_bus() {
        let conn = connection();
        let observer = StreamObserver::start("probe", Probe::default(), conn.clone(), None);
        drop(observer);

        conn.inject("data\n");
        assert!(conn.bus().is_empty());
    }
}
