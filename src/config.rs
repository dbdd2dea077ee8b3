//! Defaults and the declarative device description.
//!
//! A device is described by a [`Topology`]: its states, each recognized by a
//! prompt regex, and the transition edges between them. Topologies are plain
//! serde data so they can be loaded from JSON and validated against the
//! exported JSON schema; [`crate::device::DeviceStateGraph`] compiles them.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::templates;

/// Deadline applied to observers and navigation hops without their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Line terminator appended by `sendline`.
pub const DEFAULT_NEWLINE: &str = "\n";

/// Reserved name of the state a device is in before its connection is
/// established. It has no prompt and is never navigable.
pub const NOT_CONNECTED: &str = "NOT_CONNECTED";

fn default_true() -> bool {
    true
}

/// A named device state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StateNode {
    pub name: String,
    /// Regex recognizing the prompt printed in this state.
    pub prompt: String,
    /// `false` for proxy states the self-test does not enumerate.
    #[serde(default = "default_true")]
    pub navigable: bool,
}

impl StateNode {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            navigable: true,
        }
    }
}

/// A reply sent when `pattern` shows up while a transition is in flight
/// (password prompts, host key confirmations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InteractiveResponse {
    pub pattern: String,
    pub reply: String,
}

/// Directed transition between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StateEdge {
    pub from: String,
    pub to: String,
    /// Command triggering the transition.
    pub command: String,
    /// Pattern confirming arrival. Defaults to the target state's prompt.
    #[serde(default)]
    pub expected_prompt: Option<String>,
    #[serde(default)]
    pub responses: Vec<InteractiveResponse>,
    /// Hop deadline in seconds. Defaults to [`DEFAULT_TIMEOUT`].
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StateEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            command: command.into(),
            expected_prompt: None,
            responses: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn expect_prompt(mut self, pattern: impl Into<String>) -> Self {
        self.expected_prompt = Some(pattern.into());
        self
    }

    pub fn respond(mut self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.responses.push(InteractiveResponse {
            pattern: pattern.into(),
            reply: reply.into(),
        });
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// States and edges of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Topology {
    pub states: Vec<StateNode>,
    pub edges: Vec<StateEdge>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.states.push(StateNode::new(name, prompt));
        self
    }

    /// A state reachable by navigation but skipped by the self-test.
    pub fn proxy_state(mut self, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let mut node = StateNode::new(name, prompt);
        node.navigable = false;
        self.states.push(node);
        self
    }

    pub fn edge(self, from: impl Into<String>, to: impl Into<String>, command: impl Into<String>) -> Self {
        self.with_edge(StateEdge::new(from, to, command))
    }

    pub fn with_edge(mut self, edge: StateEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Replaces the prompt of a declared state.
    pub fn with_prompt(mut self, state: &str, prompt: impl Into<String>) -> Result<Self, ConnectError> {
        let node = self
            .states
            .iter_mut()
            .find(|s| s.name == state)
            .ok_or_else(|| ConnectError::ConfigError(format!("unknown state '{state}'")))?;
        node.prompt = prompt.into();
        Ok(self)
    }

    /// Adds an interactive reply to the `from` -> `to` edge, typically a
    /// password that cannot live in a shared template.
    pub fn respond_on(
        mut self,
        from: &str,
        to: &str,
        pattern: impl Into<String>,
        reply: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        let edge = self
            .edges
            .iter_mut()
            .find(|e| e.from == from && e.to == to)
            .ok_or_else(|| ConnectError::ConfigError(format!("unknown edge '{from}' -> '{to}'")))?;
        edge.responses.push(InteractiveResponse {
            pattern: pattern.into(),
            reply: reply.into(),
        });
        Ok(self)
    }
}

/// Configuration of one managed device.
///
/// Either names a built-in template or carries an explicit topology; an
/// explicit topology wins when both are given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub topology: Option<Topology>,
}

impl DeviceConfig {
    pub fn from_topology(name: impl Into<String>, topology: Topology) -> Self {
        Self {
            name: name.into(),
            template: None,
            topology: Some(topology),
        }
    }

    pub fn from_template(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: Some(template.into()),
            topology: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        serde_json::from_str(json).map_err(|e| ConnectError::ConfigError(format!("decode device config: {e}")))
    }

    pub fn to_json(&self) -> Result<String, ConnectError> {
        serde_json::to_string(self)
            .map_err(|e| ConnectError::InternalServerError(format!("encode device config: {e}")))
    }

    /// The topology this configuration describes.
    pub fn resolve_topology(&self) -> Result<Topology, ConnectError> {
        if let Some(topology) = &self.topology {
            return Ok(topology.clone());
        }
        match &self.template {
            Some(template) => templates::by_name(template),
            None => Err(ConnectError::ConfigError(format!(
                "device '{}' has neither a template nor a topology",
                self.name
            ))),
        }
    }

    /// JSON schema of [`DeviceConfig`].
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(DeviceConfig);
        serde_json::to_value(&schema).unwrap_or(serde_json::Value::Null)
    }
}
