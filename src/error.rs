//! Error types for observers, device state navigation and transports.
//!
//! [`ObserverError`] is the terminal failure cause of a single command or
//! event observer. It is `Clone` so that every waiter of an observer can read
//! the same cause. [`ConnectError`] is the crate-wide error returned by graph
//! construction, navigation, the self-test traversal and the transports.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Why an observer ended without a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// No terminal resolution arrived before the deadline.
    ///
    /// Kept distinct from [`ObserverError::CommandFailure`] so that callers can
    /// tell "the device said nothing" from "the device said no".
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The operation was abandoned through `cancel()`.
    #[error("cancelled")]
    Cancelled,

    /// The remote side rejected the operation or produced unexpected output.
    #[error("command failure: {0}")]
    CommandFailure(String),

    /// More than one registered prompt pattern matched the same line.
    ///
    /// This is a configuration defect of the state graph, never resolved by
    /// picking one of the candidates.
    #[error("more than one prompt matches line '{line}': {candidates:?}")]
    AmbiguousPrompt {
        line: String,
        candidates: Vec<String>,
    },

    /// A prompt of another state was confirmed instead of the expected one.
    #[error("expected state {expected}, found {found}")]
    UnexpectedState { expected: String, found: String },

    /// Writing a reply to the connection failed.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Errors that can occur during device state management and connection handling.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The target state cannot be reached from the current state.
    ///
    /// This occurs when there is no path in the device's state graph.
    #[error("unreachable state {0}")]
    UnreachableState(String),

    /// The target state does not exist in the device's state configuration.
    #[error("target state {0} not exist")]
    TargetStateNotExistError(String),

    /// The state graph configuration is invalid.
    #[error("invalid device handler config: {0}")]
    InvalidDeviceHandlerConfig(String),

    /// No built-in template has the requested name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A declarative configuration could not be decoded.
    #[error("config error: {0}")]
    ConfigError(String),

    /// An observer ended with a failure.
    #[error(transparent)]
    Observer(#[from] ObserverError),

    /// Navigation between two states failed.
    #[error("cannot change state '{from}' -> '{to}': {source}")]
    NavigationFailed {
        from: String,
        to: String,
        #[source]
        source: Box<ConnectError>,
    },

    /// Another navigation is already running on the same device.
    #[error("navigation already in progress on {0}")]
    NavigationInProgress(String),

    /// The exhaustive state traversal failed for one (source, target) pair.
    #[error("self-test failed for '{source_state}' -> '{target}': {cause}")]
    SelfTestFailed {
        source_state: String,
        target: String,
        cause: Box<ConnectError>,
    },

    /// Recorded session data did not contain the requested entry.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// The SSH channel was disconnected while waiting for data.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The connection has been closed.
    ///
    /// Returned when attempting to write through a connection that has
    /// already been closed or terminated.
    #[error("connect closed")]
    ConnectClosedError,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to queue data for the transport.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl ConnectError {
    /// Returns the observer failure cause at the bottom of this error, if any.
    pub fn observer_cause(&self) -> Option<&ObserverError> {
        match self {
            ConnectError::Observer(cause) => Some(cause),
            ConnectError::NavigationFailed { source, .. } => source.observer_cause(),
            ConnectError::SelfTestFailed { cause, .. } => cause.observer_cause(),
            _ => None,
        }
    }
}
