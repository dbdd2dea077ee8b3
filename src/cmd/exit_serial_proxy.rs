//! Leaves the python serial proxy shell.

use once_cell::sync::Lazy;
use regex::Regex;

use super::CommandParser;
use crate::observer::{LineContext, LineDispatch};

static PYTHON_PROMPT: Lazy<Regex> = Lazy::new(|| match Regex::new(r">>>\s") {
    Ok(re) => re,
    Err(err) => panic!("invalid PYTHON_PROMPT regex: {err}"),
});

/// Closes the serial port proxy, then exits the python shell it falls back
/// to. Produces no result.
#[derive(Debug, Clone, Default)]
pub struct ExitSerialProxy;

impl ExitSerialProxy {
    fn exit_from_python_shell(&mut self, line: &str, ctx: &mut LineContext<'_, ()>) -> LineDispatch {
        if PYTHON_PROMPT.is_match(line) {
            // Terminated, the python shell only evaluates complete lines.
            ctx.sendline("exit()");
            return LineDispatch::Claimed;
        }
        LineDispatch::NotClaimed
    }
}

impl CommandParser for ExitSerialProxy {
    type Output = ();

    fn command_string(&self) -> String {
        "exit_serial_proxy".to_string()
    }

    fn on_line(
        &mut self,
        line: &str,
        _is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        self.exit_from_python_shell(line, ctx)
    }

    fn result(&self) -> Option<Self::Output> {
        None
    }

    fn ret_required(&self) -> bool {
        false
    }
}

pub const COMMAND_OUTPUT: &str = "
PC10:COM11> exit_serial_proxy
PC10  serial port COM11 closed
>>> exit()

user@PC10 ~";

pub const COMMAND_PROMPT: &str = r"user@PC10 ~";
