//! Concurrent capability discovery and invocation dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use relay_common::Result;

use crate::descriptor::{qualify, split_qualified, CapabilityDescriptor};
use crate::provider::{CapabilityInvoker, InvocationResult, Liveness, Provider};
use crate::registry::{CapabilityRegistry, CapabilitySet};

/// What one provider contributed to a discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    pub provider_id: String,
    pub liveness: Liveness,
    pub capability_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one full discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub providers: Vec<ProviderOutcome>,
    pub total_capabilities: usize,
}

/// Discovers tools across every registered provider and routes invocations
/// back to the owning provider.
///
/// Discovery of each provider is independent: one slow or dead provider is
/// timed out and marked down while the rest merge normally.
pub struct CapabilityAggregator {
    providers: Vec<Arc<Provider>>,
    registry: CapabilityRegistry,
    discovery_timeout: Duration,
    invoke_timeout: Duration,
}

impl CapabilityAggregator {
    pub fn new(
        providers: Vec<Arc<Provider>>,
        discovery_timeout: Duration,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            registry: CapabilityRegistry::new(),
            discovery_timeout,
            invoke_timeout,
        }
    }

    pub fn providers(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    pub async fn snapshot(&self) -> Arc<CapabilitySet> {
        self.registry.snapshot().await
    }

    /// Run one discovery pass across all providers concurrently and swap in
    /// the merged snapshot.
    pub async fn discover(&self) -> DiscoveryReport {
        let futures = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let timeout = self.discovery_timeout;
            async move {
                let listed =
                    tokio::time::timeout(timeout, provider.client.list_capabilities()).await;
                match listed {
                    Ok(Ok(tools)) => {
                        provider.set_liveness(Liveness::Up);
                        (provider, Ok(tools))
                    }
                    Ok(Err(e)) => {
                        provider.set_liveness(Liveness::Down);
                        (provider, Err(e.to_string()))
                    }
                    Err(_) => {
                        provider.set_liveness(Liveness::Down);
                        (provider, Err(format!("discovery timed out after {timeout:?}")))
                    }
                }
            }
        });

        let results = join_all(futures).await;

        let mut merged = CapabilitySet::new();
        let mut outcomes = Vec::with_capacity(results.len());

        for (provider, listed) in results {
            match listed {
                Ok(tools) => {
                    let count = tools.len();
                    for tool in tools {
                        let qualified = qualify(&provider.id, &tool.name);
                        merged.insert(
                            qualified.clone(),
                            CapabilityDescriptor {
                                qualified_name: qualified,
                                provider_id: provider.id.clone(),
                                tool_name: tool.name,
                                description: tool.description,
                                input_schema: tool.input_schema,
                            },
                        );
                    }
                    debug!(provider = %provider.id, count, "provider discovery succeeded");
                    outcomes.push(ProviderOutcome {
                        provider_id: provider.id.clone(),
                        liveness: Liveness::Up,
                        capability_count: count,
                        error: None,
                    });
                }
                Err(reason) => {
                    warn!(provider = %provider.id, error = %reason, "provider discovery failed");
                    outcomes.push(ProviderOutcome {
                        provider_id: provider.id.clone(),
                        liveness: Liveness::Down,
                        capability_count: 0,
                        error: Some(reason),
                    });
                }
            }
        }

        let total = merged.len();
        self.registry.swap(merged).await;
        info!(
            providers = outcomes.len(),
            capabilities = total,
            "capability snapshot refreshed"
        );

        DiscoveryReport {
            providers: outcomes,
            total_capabilities: total,
        }
    }

    fn provider_by_id(&self, id: &str) -> Option<&Arc<Provider>> {
        self.providers.iter().find(|p| p.id == id)
    }

    async fn dispatch(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let (provider_id, tool_name) = split_qualified(qualified_name)?;
        let provider = self.provider_by_id(provider_id).ok_or_else(|| {
            relay_common::RelayError::Capability(format!("unknown provider: {provider_id}"))
        })?;

        let invocation = provider.client.invoke(tool_name, arguments);
        match tokio::time::timeout(self.invoke_timeout, invocation).await {
            Ok(Ok(value)) => {
                provider.set_liveness(Liveness::Up);
                Ok(value)
            }
            Ok(Err(e)) => {
                if matches!(e, relay_common::RelayError::Provider(_)) {
                    provider.set_liveness(Liveness::Down);
                }
                Err(e)
            }
            Err(_) => {
                provider.set_liveness(Liveness::Down);
                Err(relay_common::RelayError::Provider(format!(
                    "{provider_id}: invocation timed out after {:?}",
                    self.invoke_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl CapabilityInvoker for CapabilityAggregator {
    async fn invoke(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> InvocationResult {
        match self.dispatch(qualified_name, arguments).await {
            Ok(payload) => InvocationResult::Success { payload },
            Err(e) => InvocationResult::Failure {
                reason: e.to_string(),
            },
        }
    }
}
