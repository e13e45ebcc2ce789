use serde::{Deserialize, Serialize};

use relay_common::{RelayError, Result};

/// One tool exposed by a provider, under its namespaced name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Fully qualified name, `provider::tool`.
    pub qualified_name: String,
    pub provider_id: String,
    /// The provider's own (unqualified) tool name.
    pub tool_name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub input_schema: serde_json::Value,
}

/// Build a qualified capability name from provider and tool names.
///
/// Prefixing is unconditional so two providers exposing the same tool name
/// never collide and dispatch never has to guess an owner.
pub fn qualify(provider_id: &str, tool_name: &str) -> String {
    format!("{provider_id}::{tool_name}")
}

/// Split a qualified name back into `(provider, tool)`.
pub fn split_qualified(qualified: &str) -> Result<(&str, &str)> {
    qualified
        .split_once("::")
        .filter(|(p, t)| !p.is_empty() && !t.is_empty())
        .ok_or_else(|| {
            RelayError::Capability(format!("malformed capability name: {qualified}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualify_and_split_are_inverse() {
        let name = qualify("ansible", "run_playbook");
        assert_eq!(name, "ansible::run_playbook");
        assert_eq!(split_qualified(&name).unwrap(), ("ansible", "run_playbook"));
    }

    #[test]
    fn split_rejects_unqualified_names() {
        assert!(split_qualified("run_playbook").is_err());
        assert!(split_qualified("::tool").is_err());
        assert!(split_qualified("provider::").is_err());
    }

    #[test]
    fn split_keeps_separators_inside_tool_name() {
        assert_eq!(
            split_qualified("prov::ns::tool").unwrap(),
            ("prov", "ns::tool")
        );
    }
}
