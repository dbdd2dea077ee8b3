//! Textual commands.
//!
//! A [`TextualCommand`] sends its command line when started and frames the
//! output: lines before the command echo are ignored, lines after it are
//! handed to the command's [`CommandParser`], and the next prompt ends the
//! command. Generic failure messages end it with
//! [`ObserverError::CommandFailure`].

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DEFAULT_TIMEOUT;
use crate::connection::Connection;
use crate::error::{ConnectError, ObserverError};
use crate::observer::{LineContext, LineDispatch, LineHandler, StreamObserver};

pub mod exit_serial_proxy;
pub mod killall;
pub mod ps;
pub mod sftp;

pub use exit_serial_proxy::ExitSerialProxy;
pub use killall::{KilledProcess, Killall};
pub use ps::Ps;
pub use sftp::Sftp;

/// Prompt of a generic unix shell.
pub const DEFAULT_PROMPT: &str = r"^[^<]*[\$%#>~]\s*$";

static DEFAULT_PROMPT_RE: Lazy<Regex> = Lazy::new(|| match Regex::new(DEFAULT_PROMPT) {
    Ok(re) => re,
    Err(err) => panic!("invalid DEFAULT_PROMPT regex: {err}"),
});

static GENERIC_FAILURE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"command not found|No such file or directory|running it may require superuser privileges|Cannot find device|Input/output error",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid GENERIC_FAILURE regex: {err}"),
    }
});

/// Command-specific part of a textual command.
pub trait CommandParser: Send + 'static {
    type Output: Clone + Default + Send + Sync + 'static;

    /// Full command line sent to the device.
    fn command_string(&self) -> String;

    /// Parses one line of the command output.
    ///
    /// Returning [`LineDispatch::Claimed`] skips the failure and prompt checks
    /// for the line.
    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch;

    /// Parsed result, `None` when nothing was parsed.
    fn result(&self) -> Option<Self::Output>;

    /// When `true`, reaching the prompt without a result is a failure.
    fn ret_required(&self) -> bool {
        true
    }

    /// Command-specific failure messages.
    fn is_failure(&self, _line: &str) -> bool {
        false
    }
}

/// Observer handler framing the output of one command.
pub struct TextualCommand<C> {
    parser: C,
    command: String,
    prompt: Regex,
    echo_seen: bool,
}

/// A running command.
pub type CommandObserver<C> = StreamObserver<TextualCommand<C>>;

impl<C: CommandParser> TextualCommand<C> {
    /// Command ending on a generic shell prompt.
    pub fn new(parser: C) -> Self {
        Self {
            command: parser.command_string(),
            parser,
            prompt: DEFAULT_PROMPT_RE.clone(),
            echo_seen: false,
        }
    }

    /// Command ending on `prompt`.
    pub fn with_prompt(parser: C, prompt: &str) -> Result<Self, ConnectError> {
        let prompt = Regex::new(prompt)
            .map_err(|e| ConnectError::ConfigError(format!("invalid command prompt: {e}")))?;
        Ok(Self {
            prompt,
            ..Self::new(parser)
        })
    }

    pub fn command_string(&self) -> &str {
        &self.command
    }

    pub fn parser(&self) -> &C {
        &self.parser
    }

    /// Subscribes the command to `connection` and sends it.
    pub fn start(
        self,
        connection: Arc<dyn Connection>,
        timeout: Option<Duration>,
    ) -> Arc<CommandObserver<C>> {
        let name = self.command.clone();
        StreamObserver::start(name, self, connection, Some(timeout.unwrap_or(DEFAULT_TIMEOUT)))
    }

    /// Starts the command and waits for its result.
    pub async fn run(
        self,
        connection: Arc<dyn Connection>,
        timeout: Option<Duration>,
    ) -> Result<C::Output, ObserverError> {
        self.start(connection, timeout).await_result().await
    }

    fn detect_echo(&mut self, line: &str) -> LineDispatch {
        if !self.echo_seen && line.contains(&self.command) {
            self.echo_seen = true;
            return LineDispatch::Claimed;
        }
        LineDispatch::NotClaimed
    }

    fn finish(&self, ctx: &mut LineContext<'_, C::Output>) {
        match self.parser.result() {
            Some(result) => {
                ctx.resolve(result);
            }
            None if self.parser.ret_required() => {
                ctx.fail(ObserverError::CommandFailure(format!(
                    "'{}' returned no result",
                    self.command
                )));
            }
            None => {
                ctx.resolve(C::Output::default());
            }
        }
    }
}

impl<C: CommandParser> LineHandler for TextualCommand<C> {
    type Output = C::Output;

    fn on_start(&mut self, ctx: &mut LineContext<'_, Self::Output>) {
        ctx.sendline(self.command.clone());
    }

    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        if !self.echo_seen {
            return self.detect_echo(line);
        }
        self.parser.on_line(line, is_full_line, ctx)
    }

    fn on_unclaimed(&mut self, line: &str, is_full_line: bool, ctx: &mut LineContext<'_, Self::Output>) {
        if !self.echo_seen {
            return;
        }
        if is_full_line && (GENERIC_FAILURE.is_match(line) || self.parser.is_failure(line)) {
            debug!("'{}' failed: {line:?}", self.command);
            ctx.fail(ObserverError::CommandFailure(line.to_string()));
            return;
        }
        if self.prompt.is_match(line) {
            self.finish(ctx);
        }
    }
}
