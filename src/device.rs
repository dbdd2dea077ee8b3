//! Device state graph.
//!
//! States are recognized by their prompt and connected by transition
//! commands. The graph is compiled once from a [`Topology`]: every regex is
//! validated up front, so navigation never meets a bad pattern at runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use log::trace;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{NOT_CONNECTED, StateEdge, StateNode, Topology};
use crate::error::ConnectError;

/// One transition ready to be executed.
#[derive(Debug, Clone)]
pub struct Hop {
    pub from: String,
    pub to: String,
    pub command: String,
    /// Confirms arrival in `to`.
    pub confirmation: Regex,
    /// Replies sent when a pattern shows up during the hop.
    pub responses: Vec<(Regex, String)>,
    pub timeout: Duration,
}

/// Diagnostics summary for a device state machine graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StateMachineDiagnostics {
    /// Number of declared states.
    pub total_states: usize,
    /// States participating in transition graph edges.
    pub graph_states: Vec<String>,
    /// Graph entry states (in-degree = 0).
    pub entry_states: Vec<String>,
    /// Edge sources that do not exist in declared states.
    pub missing_edge_sources: Vec<String>,
    /// Edge targets that do not exist in declared states.
    pub missing_edge_targets: Vec<String>,
    /// Graph states unreachable from entry states.
    pub unreachable_states: Vec<String>,
    /// Graph states with no outgoing edges.
    pub dead_end_states: Vec<String>,
    /// Prompt regex patterns shared by multiple states.
    pub duplicate_prompt_patterns: Vec<String>,
    /// States participating in duplicate prompt-pattern groups.
    pub potentially_ambiguous_prompt_states: Vec<String>,
    /// States whose outgoing transitions are only self-loop edges.
    pub self_loop_only_states: Vec<String>,
}

impl StateMachineDiagnostics {
    /// Returns true if diagnostics indicate potential topology issues.
    pub fn has_issues(&self) -> bool {
        !self.missing_edge_sources.is_empty()
            || !self.missing_edge_targets.is_empty()
            || !self.unreachable_states.is_empty()
            || !self.dead_end_states.is_empty()
            || !self.duplicate_prompt_patterns.is_empty()
            || !self.self_loop_only_states.is_empty()
    }
}

/// Static registry of states and transitions of one device.
#[derive(Debug, Clone)]
pub struct DeviceStateGraph {
    topology: Topology,
    /// State name to index in `topology.states`.
    index: HashMap<String, usize>,
    /// One prompt per state, same order as `topology.states`.
    prompts: RegexSet,
    prompt_regexes: Vec<Regex>,
    /// Outgoing edges per state, as indexes in `hops`.
    adjacency: HashMap<String, Vec<usize>>,
    hops: Vec<Hop>,
}

fn compile(pattern: &str, what: &str) -> Result<Regex, ConnectError> {
    Regex::new(pattern).map_err(|e| {
        ConnectError::InvalidDeviceHandlerConfig(format!("invalid regex for {what}: {e}"))
    })
}

impl DeviceStateGraph {
    /// Compiles and validates a topology.
    ///
    /// Rejects empty, duplicate or reserved state names, edges between unknown
    /// states and patterns that do not compile.
    pub fn new(topology: Topology) -> Result<Self, ConnectError> {
        let mut index = HashMap::new();
        let mut prompt_regexes = Vec::with_capacity(topology.states.len());
        for (idx, state) in topology.states.iter().enumerate() {
            if state.name.is_empty() {
                return Err(ConnectError::InvalidDeviceHandlerConfig(
                    "state name must not be empty".to_string(),
                ));
            }
            if state.name == NOT_CONNECTED {
                return Err(ConnectError::InvalidDeviceHandlerConfig(format!(
                    "state name '{NOT_CONNECTED}' is reserved"
                )));
            }
            if index.insert(state.name.clone(), idx).is_some() {
                return Err(ConnectError::InvalidDeviceHandlerConfig(format!(
                    "duplicate state '{}'",
                    state.name
                )));
            }
            prompt_regexes.push(compile(
                &state.prompt,
                &format!("prompt of state '{}'", state.name),
            )?);
        }

        let prompts = RegexSet::new(topology.states.iter().map(|s| s.prompt.as_str())).map_err(
            |e| ConnectError::InvalidDeviceHandlerConfig(format!("failed to build state regex set: {e}")),
        )?;

        let mut adjacency: HashMap<String, Vec<usize>> = HashMap::new();
        let mut hops = Vec::with_capacity(topology.edges.len());
        for edge in &topology.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !index.contains_key(endpoint) {
                    return Err(ConnectError::InvalidDeviceHandlerConfig(format!(
                        "edge '{}' -> '{}' references unknown state '{}'",
                        edge.from, edge.to, endpoint
                    )));
                }
            }
            let what = format!("edge '{}' -> '{}'", edge.from, edge.to);
            let confirmation = match &edge.expected_prompt {
                Some(pattern) => compile(pattern, &what)?,
                None => prompt_regexes[index[&edge.to]].clone(),
            };
            let responses = edge
                .responses
                .iter()
                .map(|r| Ok((compile(&r.pattern, &what)?, r.reply.clone())))
                .collect::<Result<Vec<_>, ConnectError>>()?;

            adjacency.entry(edge.from.clone()).or_default().push(hops.len());
            hops.push(Hop {
                from: edge.from.clone(),
                to: edge.to.clone(),
                command: edge.command.clone(),
                confirmation,
                responses,
                timeout: edge.timeout(),
            });
        }

        Ok(Self {
            topology,
            index,
            prompts,
            prompt_regexes,
            adjacency,
            hops,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// All declared states, in declaration order.
    pub fn states(&self) -> Vec<&str> {
        self.topology.states.iter().map(|s| s.name.as_str()).collect()
    }

    /// States the self-test enumerates.
    pub fn navigable_states(&self) -> Vec<&str> {
        self.topology
            .states
            .iter()
            .filter(|s| s.navigable)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<&StateNode> {
        self.index.get(name).map(|idx| &self.topology.states[*idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn edges(&self) -> &[StateEdge] {
        &self.topology.edges
    }

    pub fn prompt(&self, name: &str) -> Option<&Regex> {
        self.index.get(name).map(|idx| &self.prompt_regexes[*idx])
    }

    /// Names of every state whose prompt matches `line`.
    ///
    /// More than one name means the line is ambiguous.
    pub fn match_prompts(&self, line: &str) -> Vec<&str> {
        self.prompts
            .matches(line)
            .into_iter()
            .map(|idx| self.topology.states[idx].name.as_str())
            .collect()
    }

    /// Shortest sequence of hops from `from` to `to`. Empty when equal.
    pub fn find_path(&self, from: &str, to: &str) -> Result<Vec<Hop>, ConnectError> {
        if !self.contains(to) {
            return Err(ConnectError::TargetStateNotExistError(to.to_string()));
        }
        if from == to {
            return Ok(Vec::new());
        }
        if !self.contains(from) {
            return Err(ConnectError::UnreachableState(to.to_string()));
        }

        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        let mut visited = HashSet::new();
        visited.insert(from.to_string());
        // child state -> hop index leading to it
        let mut predecessors: HashMap<String, usize> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }
            for hop_idx in self.adjacency.get(&current).into_iter().flatten() {
                let next = &self.hops[*hop_idx].to;
                if visited.insert(next.clone()) {
                    predecessors.insert(next.clone(), *hop_idx);
                    queue.push_back(next.clone());
                }
            }
        }

        if !predecessors.contains_key(to) {
            return Err(ConnectError::UnreachableState(to.to_string()));
        }

        let mut path = Vec::new();
        let mut current = to.to_string();
        while current != from {
            let Some(hop_idx) = predecessors.get(&current) else {
                return Err(ConnectError::InternalServerError(format!(
                    "failed to backtrack path from '{to}' to '{from}'"
                )));
            };
            let hop = &self.hops[*hop_idx];
            path.push(hop.clone());
            current = hop.from.clone();
        }
        path.reverse();
        trace!(
            "Command path: {:?}",
            path.iter().map(|h| h.command.as_str()).collect::<Vec<_>>()
        );
        Ok(path)
    }

    pub fn diagnose(&self) -> StateMachineDiagnostics {
        diagnose_topology(&self.topology)
    }
}

/// Structural report of a topology, usable before it is compiled.
pub fn diagnose_topology(topology: &Topology) -> StateMachineDiagnostics {
    let all_states_set: HashSet<&str> = topology.states.iter().map(|s| s.name.as_str()).collect();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut out_degree: HashMap<String, usize> = HashMap::new();
    let mut graph_states_set: HashSet<String> = HashSet::new();
    let mut missing_edge_sources = HashSet::new();
    let mut missing_edge_targets = HashSet::new();

    for edge in &topology.edges {
        let (from, to) = (&edge.from, &edge.to);
        if !all_states_set.contains(from.as_str()) {
            missing_edge_sources.insert(from.clone());
            continue;
        }
        if !all_states_set.contains(to.as_str()) {
            missing_edge_targets.insert(to.clone());
            continue;
        }

        graph_states_set.insert(from.clone());
        graph_states_set.insert(to.clone());

        adjacency.entry(from.clone()).or_default().push(to.clone());
        *out_degree.entry(from.clone()).or_insert(0) += 1;
        *in_degree.entry(to.clone()).or_insert(0) += 1;
        in_degree.entry(from.clone()).or_insert(0);
        out_degree.entry(to.clone()).or_insert(0);
    }

    let mut graph_states = graph_states_set.into_iter().collect::<Vec<_>>();
    graph_states.sort();

    let entry_states = graph_states
        .iter()
        .filter(|state| in_degree.get(*state).copied().unwrap_or(0) == 0)
        .cloned()
        .collect::<Vec<_>>();

    // Fully cyclic graph: start from a stable seed.
    let seeds = if entry_states.is_empty() {
        graph_states.first().cloned().into_iter().collect::<Vec<_>>()
    } else {
        entry_states.clone()
    };

    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    for seed in seeds {
        if reachable.insert(seed.clone()) {
            queue.push_back(seed);
        }
    }
    while let Some(node) = queue.pop_front() {
        for next in adjacency.get(&node).into_iter().flatten() {
            if reachable.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }

    let unreachable_states = graph_states
        .iter()
        .filter(|state| !reachable.contains(*state))
        .cloned()
        .collect::<Vec<_>>();

    let dead_end_states = graph_states
        .iter()
        .filter(|state| out_degree.get(*state).copied().unwrap_or(0) == 0)
        .cloned()
        .collect::<Vec<_>>();

    let mut missing_edge_sources = missing_edge_sources.into_iter().collect::<Vec<_>>();
    missing_edge_sources.sort();
    let mut missing_edge_targets = missing_edge_targets.into_iter().collect::<Vec<_>>();
    missing_edge_targets.sort();

    let mut duplicate_prompt_patterns = Vec::new();
    let mut ambiguous_states = HashSet::new();
    let mut pattern_states: HashMap<&str, HashSet<&str>> = HashMap::new();
    for state in &topology.states {
        pattern_states
            .entry(state.prompt.as_str())
            .or_default()
            .insert(state.name.as_str());
    }
    for (pattern, states) in pattern_states {
        if states.len() > 1 {
            let mut states_vec = states.into_iter().collect::<Vec<_>>();
            states_vec.sort();
            for state in &states_vec {
                ambiguous_states.insert(state.to_string());
            }
            duplicate_prompt_patterns.push(format!("{pattern} => {}", states_vec.join(",")));
        }
    }
    duplicate_prompt_patterns.sort();
    let mut potentially_ambiguous_prompt_states = ambiguous_states.into_iter().collect::<Vec<_>>();
    potentially_ambiguous_prompt_states.sort();

    let self_loop_only_states = graph_states
        .iter()
        .filter(|state| {
            out_degree.get(*state).copied().unwrap_or(0) > 0
                && adjacency
                    .get(*state)
                    .map(|targets| targets.iter().all(|target| target == *state))
                    .unwrap_or(false)
        })
        .cloned()
        .collect::<Vec<_>>();

    StateMachineDiagnostics {
        total_states: topology.states.len(),
        graph_states,
        entry_states,
        missing_edge_sources,
        missing_edge_targets,
        unreachable_states,
        dead_end_states,
        duplicate_prompt_patterns,
        potentially_ambiguous_prompt_states,
        self_loop_only_states,
    }
}
