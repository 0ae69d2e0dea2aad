//! MCP server loop
//!
//! Reads one JSON-RPC message per line, handles each request on its own
//! task and funnels every outgoing line through a single writer.

use std::sync::Arc;

use eyre::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{
    GetPromptParams, GetPromptResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListPromptsResult, METHOD_NOT_FOUND,
    PARSE_ERROR, PROMPTS_LIST_CHANGED, PROTOCOL_VERSION, Prompt, PromptArgument, PromptContent, PromptMessage,
    PromptsCapability, Role, ServerCapabilities, ServerInfo,
};
use crate::error::RenderError;
use crate::registry::PromptRegistry;

/// Identity and behavior knobs of the server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub name: String,
    pub version: String,
    /// Decode request arguments as JSON before rendering
    pub json_args: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "prompt-engine".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            json_args: true,
        }
    }
}

/// Serves the registry's prompts to one MCP client
pub struct McpServer {
    registry: Arc<PromptRegistry>,
    options: ServerOptions,
}

impl McpServer {
    pub fn new(registry: Arc<PromptRegistry>, options: ServerOptions) -> Self {
        debug!(?options, "McpServer::new: called");
        Self { registry, options }
    }

    /// Handle one raw input line, returning the response to send, if any
    pub fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!(error = %e, "Malformed JSON-RPC message");
                Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
                ))
            }
        }
    }

    /// Dispatch a parsed message; notifications get no response
    pub fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            self.handle_notification(&request.method);
            return None;
        };
        debug!(%id, method = %request.method, "McpServer::handle: called");

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params.as_ref()),
            "ping" => Ok(Value::Object(Default::default())),
            "prompts/list" => self.list_prompts(),
            "prompts/get" => self.get_prompt(&id, request.params),
            other => {
                warn!(method = %other, "Unknown method");
                Err(JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {other}")))
            }
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => info!("Client finished initialization"),
            other => debug!(method = %other, "McpServer: ignoring notification"),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let client = params
            .and_then(|p| p.get("clientInfo"))
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(%client, "Client connected");

        to_result(&InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                prompts: Some(PromptsCapability { list_changed: true }),
            },
            server_info: ServerInfo {
                name: self.options.name.clone(),
                version: self.options.version.clone(),
            },
        })
    }

    fn list_prompts(&self) -> Result<Value, JsonRpcError> {
        let snapshot = self.registry.snapshot();
        debug!(generation = snapshot.generation(), count = snapshot.len(), "McpServer::list_prompts: called");

        let prompts = snapshot
            .prompts()
            .map(|def| Prompt {
                name: def.name.clone(),
                description: non_empty(&def.description),
                arguments: def
                    .arguments
                    .iter()
                    .map(|name| PromptArgument {
                        name: name.clone(),
                        description: None,
                        required: true,
                    })
                    .collect(),
            })
            .collect();
        to_result(&ListPromptsResult { prompts })
    }

    fn get_prompt(&self, id: &Value, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams = params
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")))
            })?;
        info!(%id, name = %params.name, arguments = ?params.arguments, "Received prompt request");

        // one snapshot for the whole request, even if a reload lands meanwhile
        let snapshot = self.registry.snapshot();
        let definition = snapshot
            .get(&params.name)
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, RenderError::PromptNotFound(params.name.clone()).to_string()))?;

        let missing = definition.missing_arguments(&params.arguments);
        if !missing.is_empty() {
            debug!(name = %params.name, ?missing, "McpServer::get_prompt: rendering with missing arguments");
        }

        let text = definition.render(&params.arguments, self.options.json_args).map_err(|e| {
            error!(name = %params.name, error = %e, "Failed to render prompt");
            JsonRpcError::new(INTERNAL_ERROR, e.to_string())
        })?;
        info!(%id, name = %params.name, "Processed prompt request");

        to_result(&GetPromptResult {
            description: non_empty(&definition.description),
            messages: vec![PromptMessage {
                role: Role::User,
                content: PromptContent::Text { text },
            }],
        })
    }

    /// Serve requests from `reader` until it closes or `cancel` fires
    ///
    /// Sends `notifications/prompts/list_changed` whenever the registry swaps
    /// in a new snapshot.
    pub async fn run<R, W>(self, reader: R, writer: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(name = %self.options.name, version = %self.options.version, "MCP server started");
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_messages(writer, out_rx));

        let mut generations = self.registry.subscribe();
        let mut watching = true;
        let mut lines = BufReader::new(reader).lines();
        let mut in_flight = JoinSet::new();
        let server = Arc::new(self);

        let read_result: Result<()> = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopping MCP server due to cancellation");
                    break Ok(());
                }
                changed = generations.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let generation = *generations.borrow_and_update();
                    info!(%generation, "Notifying client that the prompt list changed");
                    queue(&out_tx, &JsonRpcNotification::new(PROMPTS_LIST_CHANGED));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let server = Arc::clone(&server);
                        let out_tx = out_tx.clone();
                        in_flight.spawn(async move {
                            if let Some(response) = server.handle_line(&line) {
                                queue(&out_tx, &response);
                            }
                        });
                    }
                    Ok(None) => {
                        info!("Input closed, stopping MCP server");
                        break Ok(());
                    }
                    Err(e) => break Err(e).context("Failed to read from client"),
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request task failed");
                    }
                }
            }
        };

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request task failed");
            }
        }
        drop(out_tx);
        match writer_task.await {
            Ok(Ok(())) => debug!("McpServer::run: writer finished"),
            Ok(Err(e)) => warn!(error = %e, "Writer stopped with error"),
            Err(e) => error!(error = %e, "Writer task failed"),
        }

        info!("MCP server stopped");
        read_result
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("Failed to encode result: {e}")))
}

fn queue<T: Serialize>(out: &mpsc::UnboundedSender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            if out.send(line).is_err() {
                debug!("queue: writer already closed, dropping message");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize outgoing message"),
    }
}

async fn write_messages<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await.context("Failed to write message")?;
        writer.write_all(b"\n").await.context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush message")?;
    }
    Ok(())
}
