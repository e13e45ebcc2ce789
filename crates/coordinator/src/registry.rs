use std::collections::BTreeMap;

use relay_common::{HandlerDefinition, HandlerId};
use relay_llm::ToolSchema;
use relay_mcp::CapabilitySet;

/// The handler roster for this deployment.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    definitions: BTreeMap<HandlerId, HandlerDefinition>,
    default_handler: HandlerId,
}

impl HandlerRegistry {
    pub fn new(definitions: Vec<HandlerDefinition>) -> Self {
        Self {
            definitions: definitions.into_iter().map(|d| (d.id, d)).collect(),
            default_handler: HandlerId::General,
        }
    }

    pub fn default_handler(&self) -> HandlerId {
        self.default_handler
    }

    pub fn get(&self, id: HandlerId) -> Option<&HandlerDefinition> {
        self.definitions.get(&id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &HandlerDefinition> {
        self.definitions.values()
    }

    /// Intersect a handler's bindings with the live capability snapshot.
    ///
    /// Bindings name either an exact qualified capability or a whole
    /// provider via `provider::*`. Capabilities the snapshot no longer
    /// holds simply drop out; a handler is never offered a dead tool.
    pub fn capabilities_for(
        &self,
        id: HandlerId,
        snapshot: &CapabilitySet,
    ) -> Vec<ToolSchema> {
        let Some(definition) = self.definitions.get(&id) else {
            return Vec::new();
        };

        snapshot
            .values()
            .filter(|descriptor| {
                definition.bound_capabilities.iter().any(|binding| {
                    if let Some(provider) = binding.strip_suffix("::*") {
                        descriptor.provider_id == provider
                    } else {
                        descriptor.qualified_name == *binding
                    }
                })
            })
            .map(|descriptor| ToolSchema {
                name: descriptor.qualified_name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.input_schema.clone(),
            })
            .collect()
    }
}
