//! Predefined device topologies.
//!
//! Each template describes the shells of a common lab setup: a local host,
//! an optional proxy hop, a remote host and a serial proxy reached from it.
//! Prompts assume the shells were started with a recognizable `PS1`
//! (`local$ `, `remote# `, ...); use [`Topology::with_prompt`] to adapt them
//! and [`Topology::respond_on`] to add passwords.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{StateEdge, Topology};
use crate::device::{StateMachineDiagnostics, diagnose_topology};
use crate::error::ConnectError;

/// Built-in template names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &["unix_local", "proxy_pc", "unix_remote", "at_remote"];

pub const UNIX_LOCAL: &str = "UNIX_LOCAL";
pub const UNIX_LOCAL_ROOT: &str = "UNIX_LOCAL_ROOT";
pub const PROXY_PC: &str = "PROXY_PC";
pub const UNIX_REMOTE: &str = "UNIX_REMOTE";
pub const UNIX_REMOTE_ROOT: &str = "UNIX_REMOTE_ROOT";
pub const AT_REMOTE: &str = "AT_REMOTE";

const HOST_KEY_CONFIRMATION: &str = r"continue connecting \(yes/no(/\[fingerprint\])?\)\?";

/// Capability tags used to describe template compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCapability {
    RootShell,
    ProxyHop,
    RemoteShell,
    SerialProxy,
    InteractiveInput,
}

/// Metadata for a built-in device template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub family: String,
    pub template_version: String,
    pub capabilities: Vec<TemplateCapability>,
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let (family, capabilities) = match name {
        "unix_local" => (
            "Unix",
            vec![TemplateCapability::RootShell, TemplateCapability::InteractiveInput],
        ),
        "proxy_pc" => (
            "Unix",
            vec![TemplateCapability::ProxyHop, TemplateCapability::InteractiveInput],
        ),
        "unix_remote" => (
            "Unix",
            vec![
                TemplateCapability::ProxyHop,
                TemplateCapability::RemoteShell,
                TemplateCapability::RootShell,
                TemplateCapability::InteractiveInput,
            ],
        ),
        "at_remote" => (
            "AT",
            vec![
                TemplateCapability::ProxyHop,
                TemplateCapability::RemoteShell,
                TemplateCapability::SerialProxy,
                TemplateCapability::InteractiveInput,
            ],
        ),
        _ => return None,
    };
    Some(TemplateMetadata {
        name: name.to_string(),
        family: family.to_string(),
        template_version: "1.0.0".to_string(),
        capabilities,
    })
}

/// Returns names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in templates.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one template by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| ConnectError::TemplateNotFound(name.to_string()))
}

/// Creates a built-in template by name (case-insensitive).
pub fn by_name(name: &str) -> Result<Topology, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "unix_local" => Ok(unix_local()),
        "proxy_pc" => Ok(proxy_pc()),
        "unix_remote" => Ok(unix_remote()),
        "at_remote" => Ok(at_remote()),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

/// Builds a template by name and returns its state-machine diagnostics.
pub fn diagnose_template(name: &str) -> Result<StateMachineDiagnostics, ConnectError> {
    let topology = by_name(name)?;
    Ok(diagnose_topology(&topology))
}

/// Builds a template by name and exports diagnostics as pretty JSON.
pub fn diagnose_template_json(name: &str) -> Result<String, ConnectError> {
    let report = diagnose_template(name)?;
    serde_json::to_string_pretty(&report)
        .map_err(|e| ConnectError::InternalServerError(format!("encode diagnostics json: {e}")))
}

/// Exports diagnostics for all built-in templates as pretty JSON.
pub fn diagnose_all_templates_json() -> Result<String, ConnectError> {
    let mut reports = std::collections::BTreeMap::new();
    for name in BUILTIN_TEMPLATES {
        reports.insert((*name).to_string(), diagnose_template(name)?);
    }
    serde_json::to_string_pretty(&reports)
        .map_err(|e| ConnectError::InternalServerError(format!("encode diagnostics json: {e}")))
}

/// Local shell and its root shell.
pub fn unix_local() -> Topology {
    Topology::new()
        .state(UNIX_LOCAL, r"^local\$\s*$")
        .state(UNIX_LOCAL_ROOT, r"^local#\s*$")
        .edge(UNIX_LOCAL, UNIX_LOCAL_ROOT, "su")
        .edge(UNIX_LOCAL_ROOT, UNIX_LOCAL, "exit")
}

/// Local shell and a proxy host reached over ssh.
pub fn proxy_pc() -> Topology {
    Topology::new()
        .state(UNIX_LOCAL, r"^local\$\s*$")
        .state(PROXY_PC, r"^proxy\$\s*$")
        .with_edge(StateEdge::new(UNIX_LOCAL, PROXY_PC, "ssh proxy").respond(HOST_KEY_CONFIRMATION, "yes"))
        .edge(PROXY_PC, UNIX_LOCAL, "exit")
}

/// Remote host reached through the proxy, with its root shell.
///
/// The proxy is a pass-through hop and is not enumerated by the self-test.
pub fn unix_remote() -> Topology {
    Topology::new()
        .state(UNIX_LOCAL, r"^local\$\s*$")
        .proxy_state(PROXY_PC, r"^proxy\$\s*$")
        .state(UNIX_REMOTE, r"^remote\$\s*$")
        .state(UNIX_REMOTE_ROOT, r"^remote#\s*$")
        .with_edge(StateEdge::new(UNIX_LOCAL, PROXY_PC, "ssh proxy").respond(HOST_KEY_CONFIRMATION, "yes"))
        .edge(PROXY_PC, UNIX_LOCAL, "exit")
        .with_edge(StateEdge::new(PROXY_PC, UNIX_REMOTE, "ssh remote").respond(HOST_KEY_CONFIRMATION, "yes"))
        .edge(UNIX_REMOTE, PROXY_PC, "exit")
        .edge(UNIX_REMOTE, UNIX_REMOTE_ROOT, "su")
        .edge(UNIX_REMOTE_ROOT, UNIX_REMOTE, "exit")
}

/// Python serial proxy started on the remote host.
pub fn at_remote() -> Topology {
    Topology::new()
        .state(UNIX_LOCAL, r"^local\$\s*$")
        .proxy_state(PROXY_PC, r"^proxy\$\s*$")
        .state(UNIX_REMOTE, r"^remote\$\s*$")
        .state(AT_REMOTE, r"^>>>\s*$")
        .with_edge(StateEdge::new(UNIX_LOCAL, PROXY_PC, "ssh proxy").respond(HOST_KEY_CONFIRMATION, "yes"))
        .edge(PROXY_PC, UNIX_LOCAL, "exit")
        .with_edge(StateEdge::new(PROXY_PC, UNIX_REMOTE, "ssh remote").respond(HOST_KEY_CONFIRMATION, "yes"))
        .edge(UNIX_REMOTE, PROXY_PC, "exit")
        .with_edge(
            StateEdge::new(UNIX_REMOTE, AT_REMOTE, "python3 -i serial_proxy.py --device /dev/ttyS0")
                .timeout_secs(20),
        )
        .edge(AT_REMOTE, UNIX_REMOTE, "exit()")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStateGraph;

    #[test]
    fn available_templates_contains_expected_names() {
        let names = available_templates();
        assert!(names.contains(&"unix_local"));
        assert!(names.contains(&"at_remote"));
    }

    #[test]
    fn by_name_is_case_insensitive() {
        assert!(by_name("UNIX_LOCAL").is_ok());
        assert!(by_name("Proxy_Pc").is_ok());
    }

    #[test]
    fn by_name_returns_template_not_found_for_unknown_name() {
        match by_name("missing") {
            Err(ConnectError::TemplateNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn every_builtin_template_compiles_without_issues() {
        for name in BUILTIN_TEMPLATES {
            let topology = by_name(name).expect("builtin template");
            DeviceStateGraph::new(topology).expect("builtin template compiles");
            let report = diagnose_template(name).expect("diagnostics");
            assert!(!report.has_issues(), "{name}: {report:?}");
        }
    }

    #[test]
    fn template_catalog_has_metadata_for_all_builtin_templates() {
        let catalog = template_catalog();
        assert_eq!(catalog.len(), BUILTIN_TEMPLATES.len());
        assert_eq!(
            template_metadata("AT_REMOTE").expect("metadata").family,
            "AT".to_string()
        );
    }

    #[test]
    fn diagnose_all_templates_json_includes_builtin_template_keys() {
        let json = diagnose_all_templates_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        for name in BUILTIN_TEMPLATES {
            assert!(value.get(*name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn remote_template_hides_the_proxy_from_the_self_test() {
        let graph = DeviceStateGraph::new(unix_remote()).expect("valid");
        assert_eq!(
            graph.navigable_states(),
            vec![UNIX_LOCAL, UNIX_REMOTE, UNIX_REMOTE_ROOT]
        );
        let path = graph.find_path(UNIX_LOCAL, UNIX_REMOTE_ROOT).expect("path");
        assert_eq!(path.len(), 3);
    }
}
