//! Configuration for the relay.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use relay_common::{HandlerDefinition, HandlerId};
use relay_llm::LlmConfig;

use crate::executor::LoopLimits;

/// Top-level relay configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Reasoning backend settings.
    pub llm: LlmConfig,

    /// Capability providers to connect to.
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    /// Overrides for the built-in handler definitions.
    #[serde(default)]
    pub handlers: Vec<HandlerSettings>,

    /// Execution loop bounds.
    #[serde(default)]
    pub limits: LoopLimits,

    /// Per-provider discovery timeout.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Per-invocation timeout.
    #[serde(default = "default_invoke_timeout_ms")]
    pub invoke_timeout_ms: u64,
}

fn default_discovery_timeout_ms() -> u64 {
    10_000
}

fn default_invoke_timeout_ms() -> u64 {
    60_000
}

/// One capability provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Namespace prefix for every tool this provider exposes.
    pub id: String,

    #[serde(flatten)]
    pub transport: ProviderTransportSettings,

    /// Disabled providers are ignored at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Transport for reaching a provider's MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ProviderTransportSettings {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    StreamableHttp {
        url: String,
    },
}

/// Partial override for one handler definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSettings {
    pub id: HandlerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            providers: Vec::new(),
            handlers: Vec::new(),
            limits: LoopLimits::default(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            invoke_timeout_ms: default_invoke_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides for the reasoning backend.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        if config.llm.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. Prefer the LLM_API_KEY \
                 environment variable.",
                path.display()
            );
        }

        config.llm.apply_env_overrides();
        Ok(config)
    }

    /// Build the effective handler definitions: the built-in defaults with
    /// any file overrides merged on top.
    pub fn handler_definitions(&self) -> Vec<HandlerDefinition> {
        let mut definitions = builtin_handlers();
        for settings in &self.handlers {
            if let Some(def) = definitions.iter_mut().find(|d| d.id == settings.id) {
                if let Some(ref instructions) = settings.instructions {
                    def.instructions = instructions.clone();
                }
                if !settings.triggers.is_empty() {
                    def.triggers = settings.triggers.clone();
                }
                if !settings.capabilities.is_empty() {
                    def.bound_capabilities = settings.capabilities.iter().cloned().collect();
                }
            }
        }
        definitions
    }
}

/// Reject config files other users can tamper with or read keys out of.
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;

    if !metadata.is_file() {
        anyhow::bail!("config path '{}' is not a regular file", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = content.contains("api_key") && content.contains("=");

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

fn triggers(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn bindings(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// The built-in handler roster.
pub fn builtin_handlers() -> Vec<HandlerDefinition> {
    vec![
        HandlerDefinition {
            id: HandlerId::Ansible,
            instructions: "You are an automation specialist assisting {user_id}. \
                           Current time: {time}. You manage hosts, inventories and \
                           playbooks through your tools. Prefer dry runs when the \
                           user has not confirmed a change."
                .to_string(),
            triggers: triggers(&[
                "ansible", "playbook", "inventory", "role", "vault", "galaxy", "awx",
            ]),
            bound_capabilities: bindings(&["ansible::*"]),
        },
        HandlerDefinition {
            id: HandlerId::Openshift,
            instructions: "You are a container platform specialist assisting {user_id}. \
                           Current time: {time}. You inspect and operate cluster \
                           workloads through your tools. Never delete resources \
                           without an explicit request."
                .to_string(),
            triggers: triggers(&[
                "openshift", "pod", "deployment", "namespace", "route", "cluster", "oc",
                "kubernetes", "container",
            ]),
            bound_capabilities: bindings(&["openshift::*"]),
        },
        HandlerDefinition {
            id: HandlerId::Terraform,
            instructions: "You are an infrastructure-as-code specialist assisting \
                           {user_id}. Current time: {time}. You plan and apply \
                           infrastructure changes through your tools. Always show the \
                           plan before applying."
                .to_string(),
            triggers: triggers(&[
                "terraform", "tfstate", "tfvars", "provision", "hcl", "workspace", "plan",
                "apply",
            ]),
            bound_capabilities: bindings(&["terraform::*"]),
        },
        HandlerDefinition {
            id: HandlerId::General,
            instructions: "You are an operations assistant helping {user_id}. \
                           Current time: {time}. Answer directly and concisely. If a \
                           request needs a specialist tool you do not have, say which \
                           kind of task it is so the user can rephrase."
                .to_string(),
            triggers: Vec::new(),
            bound_capabilities: BTreeSet::new(),
        },
    ]
}
