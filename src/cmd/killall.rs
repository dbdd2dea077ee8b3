//! `killall [-v] <name>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CommandParser;
use crate::observer::{LineContext, LineDispatch};

static KILLED: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"Killed\s+(?P<name>\S+)\((?P<pid>\d+)\)\s+with\s+signal\s+(?P<signal>\d+)") {
        Ok(re) => re,
        Err(err) => panic!("invalid KILLED regex: {err}"),
    }
});

static FAILURE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"no process killed|Operation not permitted") {
    Ok(re) => re,
    Err(err) => panic!("invalid FAILURE regex: {err}"),
});

/// One process reported by `killall -v`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KilledProcess {
    pub name: String,
    pub pid: u32,
    pub signal: u32,
}

/// Kills processes by name. Without `-v` a successful run prints nothing and
/// yields an empty list.
#[derive(Debug, Clone)]
pub struct Killall {
    name: String,
    is_verbose: bool,
    killed: Vec<KilledProcess>,
}

impl Killall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_verbose: false,
            killed: Vec::new(),
        }
    }

    pub fn verbose(mut self, is_verbose: bool) -> Self {
        self.is_verbose = is_verbose;
        self
    }
}

impl CommandParser for Killall {
    type Output = Vec<KilledProcess>;

    fn command_string(&self) -> String {
        if self.is_verbose {
            format!("killall -v {}", self.name)
        } else {
            format!("killall {}", self.name)
        }
    }

    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        _ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        if !is_full_line {
            return LineDispatch::NotClaimed;
        }
        let Some(caps) = KILLED.captures(line) else {
            return LineDispatch::NotClaimed;
        };
        let (Ok(pid), Ok(signal)) = (caps["pid"].parse::<u32>(), caps["signal"].parse::<u32>()) else {
            return LineDispatch::NotClaimed;
        };
        self.killed.push(KilledProcess {
            name: caps["name"].to_string(),
            pid,
            signal,
        });
        LineDispatch::Claimed
    }

    fn result(&self) -> Option<Self::Output> {
        (!self.killed.is_empty()).then(|| self.killed.clone())
    }

    fn ret_required(&self) -> bool {
        false
    }

    fn is_failure(&self, line: &str) -> bool {
        FAILURE.is_match(line)
    }
}

pub const COMMAND_OUTPUT_NO_PERMIT: &str = "
[emssim@Pclinux90: ~]$ killall iperf
iperf(14820): Operation not permitted
iperf(14823): Operation not permitted
iperf: no process killed
[emssim@Pclinux90: ~]$";

pub const COMMAND_OUTPUT_VERBOSE: &str = "
[emssim@Pclinux90: ~]$ killall -v iperf
Killed iperf(14820) with signal 15
Killed iperf(14823) with signal 15
[emssim@Pclinux90: ~]$";

pub const COMMAND_OUTPUT_QUIET: &str = "
[emssim@Pclinux90: ~]$ killall iperf
[emssim@Pclinux90: ~]$";
