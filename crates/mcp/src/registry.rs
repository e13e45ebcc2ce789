use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::descriptor::CapabilityDescriptor;

/// Immutable snapshot of every known capability, keyed by qualified name.
pub type CapabilitySet = BTreeMap<String, CapabilityDescriptor>;

/// Holds the current capability snapshot.
///
/// Readers take a cheap `Arc` clone and keep dispatching against it while a
/// discovery pass builds the next snapshot; the swap is atomic, so a turn
/// never observes a half-refreshed set.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    current: RwLock<Arc<CapabilitySet>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Arc<CapabilitySet> {
        self.current.read().await.clone()
    }

    pub async fn swap(&self, next: CapabilitySet) -> Arc<CapabilitySet> {
        let next = Arc::new(next);
        *self.current.write().await = next.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::qualify;

    fn descriptor(provider: &str, tool: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            qualified_name: qualify(provider, tool),
            provider_id: provider.into(),
            tool_name: tool.into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn old_snapshot_survives_a_swap() {
        let registry = CapabilityRegistry::new();
        let mut first = CapabilitySet::new();
        first.insert("a::x".into(), descriptor("a", "x"));
        registry.swap(first).await;

        let held = registry.snapshot().await;

        let mut second = CapabilitySet::new();
        second.insert("b::y".into(), descriptor("b", "y"));
        registry.swap(second).await;

        assert!(held.contains_key("a::x"));
        let fresh = registry.snapshot().await;
        assert!(fresh.contains_key("b::y"));
        assert!(!fresh.contains_key("a::x"));
    }
}
