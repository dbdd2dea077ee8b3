//! Runs an observer against canned device output.
//!
//! Every command and event ships its documentation triad: the raw output a
//! device prints, the parameters the observer is built with and the result
//! it must produce. These helpers replay the output through a
//! [`FifoConnection`] so the triad is executable.

use std::sync::Arc;

use crate::cmd::{CommandParser, TextualCommand};
use crate::connection::FifoConnection;
use crate::error::ObserverError;
use crate::observer::{LineHandler, StreamObserver};

/// Outcome of one fixture run.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRun<T> {
    pub result: Result<T, ObserverError>,
    /// Everything the observer wrote, newlines included.
    pub sent: Vec<String>,
}

/// Starts `handler` on a fresh connection and injects `output`, whole or in
/// chunks of `chunk_size` characters.
///
/// An observer still pending once the output is exhausted reports a timeout.
pub fn run_handler<H: LineHandler>(
    name: &str,
    handler: H,
    output: &str,
    chunk_size: Option<usize>,
) -> FixtureRun<H::Output> {
    let connection = Arc::new(FifoConnection::new(name));
    let observer = StreamObserver::start(name, handler, connection.clone(), None);

    match chunk_size {
        Some(size) if size > 0 => {
            let chars = output.chars().collect::<Vec<_>>();
            for chunk in chars.chunks(size) {
                connection.inject(&chunk.iter().collect::<String>());
            }
        }
        _ => connection.inject(output),
    }

    let result = observer.result().unwrap_or(Err(ObserverError::Timeout {
        elapsed: observer.elapsed(),
    }));
    FixtureRun {
        result,
        sent: connection.sent(),
    }
}

pub fn run_event_fixture<H: LineHandler>(
    name: &str,
    handler: H,
    output: &str,
) -> Result<H::Output, ObserverError> {
    run_handler(name, handler, output, None).result
}

pub fn run_event_fixture_in_chunks<H: LineHandler>(
    name: &str,
    handler: H,
    output: &str,
    chunk_size: usize,
) -> Result<H::Output, ObserverError> {
    run_handler(name, handler, output, Some(chunk_size)).result
}

pub fn run_command_fixture<C: CommandParser>(
    command: TextualCommand<C>,
    output: &str,
) -> FixtureRun<C::Output> {
    let name = command.command_string().to_string();
    run_handler(&name, command, output, None)
}

pub fn run_command_fixture_in_chunks<C: CommandParser>(
    command: TextualCommand<C>,
    output: &str,
    chunk_size: usize,
) -> FixtureRun<C::Output> {
    let name = command.command_string().to_string();
    run_handler(&name, command, output, Some(chunk_size))
}
