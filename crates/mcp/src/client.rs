//! MCP client for a single capability provider.
//!
//! Providers are external MCP servers reached either by spawning a child
//! process (stdio transport) or over streamable HTTP. One client holds one
//! live connection and exposes the provider's tools to the aggregator.

use std::borrow::Cow;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, RawContent};
use rmcp::service::{Peer, RoleClient};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use relay_common::{RelayError, Result};

use crate::provider::{ProviderClient, ToolListing};

/// How to reach a provider's MCP server.
#[derive(Debug, Clone)]
pub enum ProviderTransport {
    /// Spawn the server as a child process and talk MCP over stdio.
    Stdio { command: String, args: Vec<String> },
    /// Connect to a remote server over streamable HTTP.
    StreamableHttp { url: String },
}

/// MCP connection to one provider.
///
/// The connection is established lazily on first use and re-established
/// after a failure; the peer handle is swapped under a lock so concurrent
/// callers share one session.
pub struct McpProviderClient {
    id: String,
    transport: ProviderTransport,
    peer: RwLock<Option<Peer<RoleClient>>>,
    connection_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl McpProviderClient {
    pub fn new(id: impl Into<String>, transport: ProviderTransport) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            transport,
            peer: RwLock::new(None),
            connection_handle: RwLock::new(None),
        })
    }

    /// Establish the MCP session, replacing any previous one.
    pub async fn connect(&self) -> Result<()> {
        info!(provider = %self.id, "connecting to capability provider");

        let peer = match &self.transport {
            ProviderTransport::Stdio { command, args } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit());

                let child_transport = TokioChildProcess::new(cmd).map_err(|e| {
                    RelayError::Provider(format!("{}: failed to spawn server: {e}", self.id))
                })?;

                // The () handler means we ignore server->client requests.
                let running = ().serve(child_transport).await.map_err(|e| {
                    RelayError::Provider(format!("{}: handshake failed: {e}", self.id))
                })?;

                let peer = running.peer().clone();
                let handle = tokio::spawn(async move {
                    let _ = running.waiting().await;
                });
                *self.connection_handle.write().await = Some(handle);
                peer
            }
            ProviderTransport::StreamableHttp { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                let running = ().serve(transport).await.map_err(|e| {
                    RelayError::Provider(format!("{}: handshake failed: {e}", self.id))
                })?;

                let peer = running.peer().clone();
                let handle = tokio::spawn(async move {
                    let _ = running.waiting().await;
                });
                *self.connection_handle.write().await = Some(handle);
                peer
            }
        };

        *self.peer.write().await = Some(peer);
        info!(provider = %self.id, "provider connected");
        Ok(())
    }

    async fn peer_or_connect(&self) -> Result<Peer<RoleClient>> {
        if let Some(peer) = self.peer.read().await.clone() {
            return Ok(peer);
        }
        self.connect().await?;
        self.peer
            .read()
            .await
            .clone()
            .ok_or_else(|| RelayError::Provider(format!("{}: not connected", self.id)))
    }

    /// Drop the cached peer so the next call reconnects.
    async fn reset(&self) {
        *self.peer.write().await = None;
        if let Some(handle) = self.connection_handle.write().await.take() {
            handle.abort();
        }
    }

    fn extract_text(content: &[Content]) -> String {
        content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn result_to_value(result: &CallToolResult) -> serde_json::Value {
        let text = Self::extract_text(&result.content);
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    }
}

#[async_trait]
impl ProviderClient for McpProviderClient {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn list_capabilities(&self) -> Result<Vec<ToolListing>> {
        let peer = self.peer_or_connect().await?;

        let tools = match peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(provider = %self.id, error = %e, "tool listing failed, resetting session");
                self.reset().await;
                return Err(RelayError::Provider(format!(
                    "{}: failed to list tools: {e}",
                    self.id
                )));
            }
        };

        debug!(
            provider = %self.id,
            tools = ?tools.iter().map(|t| t.name.as_ref()).collect::<Vec<_>>(),
            "discovered provider tools"
        );

        Ok(tools
            .into_iter()
            .map(|t| ToolListing {
                name: t.name.to_string(),
                description: t
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .to_string(),
                input_schema: serde_json::Value::Object(t.input_schema.as_ref().clone()),
            })
            .collect())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let peer = self.peer_or_connect().await?;

        debug!(provider = %self.id, tool = %tool_name, "invoking provider tool");

        let arguments = match arguments {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };

        let request = CallToolRequestParam {
            name: Cow::Owned(tool_name.to_string()),
            arguments,
        };

        let result = match peer.call_tool(request).await {
            Ok(result) => result,
            Err(e) => {
                self.reset().await;
                return Err(RelayError::Provider(format!(
                    "{}: tool call failed: {e}",
                    self.id
                )));
            }
        };

        if result.is_error.unwrap_or(false) {
            return Err(RelayError::Capability(Self::extract_text(&result.content)));
        }

        Ok(Self::result_to_value(&result))
    }
}
