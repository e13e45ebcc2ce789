//! Ties routing, capability aggregation and the execution loop together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_common::{ConversationContext, HandlerId, Message, RelayError, Result};
use relay_llm::{build_reasoning_client, ReasoningClient};
use relay_mcp::{
    CapabilityAggregator, DiscoveryReport, McpProviderClient, Provider, ProviderTransport,
    ToolInvocation,
};

use crate::classifier::Classifier;
use crate::config::{ProviderTransportSettings, RelayConfig};
use crate::executor::{ExecutionLoop, TurnOutcome, TurnStatus};
use crate::registry::HandlerRegistry;

/// One incoming turn.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub thread_id: String,
    pub user_id: String,
    pub message: String,
    /// Explicit handler override; skips classification.
    #[serde(default)]
    pub handler: Option<HandlerId>,
}

/// What a turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub reply: String,
    pub handler: HandlerId,
    pub status: TurnStatus,
    pub invocations: Vec<ToolInvocation>,
}

/// The relay's top-level service object.
pub struct Coordinator {
    registry: Arc<HandlerRegistry>,
    classifier: Classifier,
    executor: ExecutionLoop,
    aggregator: Arc<CapabilityAggregator>,
    threads: Mutex<HashMap<String, Arc<Mutex<ConversationContext>>>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        reasoning: Arc<dyn ReasoningClient>,
        aggregator: Arc<CapabilityAggregator>,
        limits: crate::executor::LoopLimits,
    ) -> Self {
        let classifier = Classifier::new(registry.clone(), Some(reasoning.clone()));
        let executor = ExecutionLoop::new(reasoning, aggregator.clone(), limits);
        Self {
            registry,
            classifier,
            executor,
            aggregator,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the full stack from configuration. Providers are registered
    /// but not contacted; call [`Coordinator::refresh_capabilities`] to run
    /// the first discovery pass.
    pub fn from_config(config: &RelayConfig) -> Self {
        let providers: Vec<Arc<Provider>> = config
            .providers
            .iter()
            .filter(|settings| settings.enabled)
            .map(|settings| {
                let transport = match &settings.transport {
                    ProviderTransportSettings::Stdio { command, args } => ProviderTransport::Stdio {
                        command: command.clone(),
                        args: args.clone(),
                    },
                    ProviderTransportSettings::StreamableHttp { url } => {
                        ProviderTransport::StreamableHttp { url: url.clone() }
                    }
                };
                let client = McpProviderClient::new(settings.id.clone(), transport);
                Arc::new(Provider::new(settings.id.clone(), client))
            })
            .collect();

        info!(providers = providers.len(), "registering capability providers");

        let aggregator = Arc::new(CapabilityAggregator::new(
            providers,
            Duration::from_millis(config.discovery_timeout_ms),
            Duration::from_millis(config.invoke_timeout_ms),
        ));

        let registry = Arc::new(HandlerRegistry::new(config.handler_definitions()));
        let reasoning: Arc<dyn ReasoningClient> = Arc::from(build_reasoning_client(&config.llm));

        Self::new(registry, reasoning, aggregator, config.limits.clone())
    }

    pub fn aggregator(&self) -> &Arc<CapabilityAggregator> {
        &self.aggregator
    }

    /// Run a discovery pass across all providers and swap in the result.
    pub async fn refresh_capabilities(&self) -> DiscoveryReport {
        self.aggregator.discover().await
    }

    /// Process one turn end to end.
    ///
    /// Turns on the same thread are serialized by a per-thread lock;
    /// different threads run concurrently.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        self.process_turn_with_cancel(request, CancellationToken::new())
            .await
    }

    pub async fn process_turn_with_cancel(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let context = self.thread(&request.thread_id, &request.user_id).await;
        let mut context = context.lock().await;

        context.push(Message::user(request.message.clone()));

        let handler = match request.handler {
            Some(handler) => {
                // An explicit override still pins the thread so follow-ups
                // land on the same handler.
                if handler != self.registry.default_handler() {
                    context.pinned_handler = Some(handler);
                }
                handler
            }
            None => {
                self.classifier
                    .route(&request.message, &mut context)
                    .await
                    .handler
            }
        };

        let definition = self
            .registry
            .get(handler)
            .ok_or_else(|| RelayError::Routing(format!("no definition for handler {handler}")))?;

        let snapshot = self.aggregator.snapshot().await;
        let tools = self.registry.capabilities_for(handler, &snapshot);

        let TurnOutcome {
            status,
            reply,
            invocations,
        } = self
            .executor
            .run(definition, &mut context, tools, cancel)
            .await?;

        Ok(TurnResponse {
            reply,
            handler,
            status,
            invocations,
        })
    }

    async fn thread(&self, thread_id: &str, user_id: &str) -> Arc<Mutex<ConversationContext>> {
        let mut threads = self.threads.lock().await;
        threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationContext::new(thread_id, user_id)))
            })
            .clone()
    }
}
