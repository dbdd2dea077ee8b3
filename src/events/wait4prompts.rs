use std::borrow::Cow;
use std::time::SystemTime;

use log::debug;
use regex::{Regex, RegexSet};

use crate::device::DeviceStateGraph;
use crate::error::{ConnectError, ObserverError};
use crate::helpers;
use crate::observer::{LineContext, LineDispatch, LineHandler};

/// One prompt seen on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptOccurrence {
    pub line: String,
    pub prompt_regex: String,
    pub state: String,
    pub time: SystemTime,
}

/// Waits for lines matching one of the known state prompts.
///
/// Patterns are searched anywhere in the line. A line matching the prompts of
/// more than one state fails the event with [`ObserverError::AmbiguousPrompt`].
/// With `till_occurs_times == Some(n)` the event resolves with the first `n`
/// occurrences; with `None` it records occurrences until cancelled.
pub struct Wait4Prompts {
    /// (pattern, state), sorted by pattern text.
    prompts: Vec<(Regex, String)>,
    set: RegexSet,
    till_occurs_times: Option<usize>,
    occurrences: Vec<PromptOccurrence>,
}

impl Wait4Prompts {
    pub fn new<P, S>(
        prompts: impl IntoIterator<Item = (P, S)>,
        till_occurs_times: Option<usize>,
    ) -> Result<Self, ConnectError>
    where
        P: AsRef<str>,
        S: Into<String>,
    {
        let mut compiled = prompts
            .into_iter()
            .map(|(pattern, state)| {
                let regex = Regex::new(pattern.as_ref()).map_err(|e| {
                    ConnectError::InvalidDeviceHandlerConfig(format!("invalid prompt regex: {e}"))
                })?;
                Ok((regex, state.into()))
            })
            .collect::<Result<Vec<_>, ConnectError>>()?;
        compiled.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let set = RegexSet::new(compiled.iter().map(|(regex, _)| regex.as_str())).map_err(|e| {
            ConnectError::InvalidDeviceHandlerConfig(format!("failed to build prompt regex set: {e}"))
        })?;

        Ok(Self {
            prompts: compiled,
            set,
            till_occurs_times,
            occurrences: Vec::new(),
        })
    }

    /// Watches the prompts of every state of `graph`.
    pub fn for_graph(graph: &DeviceStateGraph, till_occurs_times: Option<usize>) -> Result<Self, ConnectError> {
        Self::new(
            graph
                .topology()
                .states
                .iter()
                .map(|s| (s.prompt.as_str(), s.name.clone())),
            till_occurs_times,
        )
    }

    pub fn occurrences(&self) -> &[PromptOccurrence] {
        &self.occurrences
    }

    fn parse_prompts(&mut self, line: &str, ctx: &mut LineContext<'_, Vec<PromptOccurrence>>) -> LineDispatch {
        let matched = self.set.matches(line);
        let Some(first) = matched.iter().next() else {
            return LineDispatch::NotClaimed;
        };

        let mut candidates = Vec::new();
        for idx in matched.iter() {
            let state = &self.prompts[idx].1;
            if !candidates.contains(state) {
                candidates.push(state.clone());
            }
        }
        if candidates.len() > 1 {
            debug!("more than one state for line {line:?}: {candidates:?}");
            ctx.fail(ObserverError::AmbiguousPrompt {
                line: line.to_string(),
                candidates,
            });
            return LineDispatch::Claimed;
        }

        let (regex, state) = &self.prompts[first];
        self.occurrences.push(PromptOccurrence {
            line: line.to_string(),
            prompt_regex: regex.as_str().to_string(),
            state: state.clone(),
            time: SystemTime::now(),
        });
        if let Some(times) = self.till_occurs_times
            && self.occurrences.len() >= times
        {
            ctx.resolve(self.occurrences.clone());
        }
        LineDispatch::Claimed
    }
}

impl LineHandler for Wait4Prompts {
    type Output = Vec<PromptOccurrence>;

    fn on_line(
        &mut self,
        line: &str,
        _is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        self.parse_prompts(line, ctx)
    }

    fn decode_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        helpers::remove_xterm_window_title_hack(line)
    }
}

pub const EVENT_OUTPUT: &str = "
user@host01:~> TERM=xterm-mono telnet -4 host.domain.net 1500
Login:
Login:user
Password:
Last login: Thu Nov 23 10:38:16 2017 from 127.0.0.1
Have a lot of fun...
CLIENT5 [] has just connected!
host:~ #";

pub const EVENT_PROMPTS: &[(&str, &str)] = &[(r"host:.*#", "UNIX_LOCAL")];

pub const EVENT_RESULT_LINE: &str = "host:~ #";

pub const EVENT_RESULT_STATE: &str = "UNIX_LOCAL";
