//! Agent loop — the LLM ↔ tool-calling main loop.
//!
//! Receives inbound messages, builds context, calls the LLM, dispatches
//! tool calls, and publishes outbound responses. One invocation runs per
//! session per inbound message; concurrent invocations for *different*
//! sessions proceed in parallel, but a second concurrent dispatch for the
//! *same* session key is rejected with [`AgentError::Busy`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use corvus_core::bus::queue::MessageBus;
use corvus_core::bus::types::{InboundMessage, OutboundMessage};
use corvus_core::session::manager::SessionManager;
use corvus_core::types::{Message, ToolCall};
use corvus_providers::traits::{ChatStreamDelta, LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::error::AgentError;
use crate::subagent::SubagentManager;
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 20;
/// Approximate model context window used for summarization budgeting when
/// the caller doesn't configure one explicitly.
const DEFAULT_CONTEXT_WINDOW_TOKENS: usize = 128_000;
/// Appended to the final content when the loop exhausts `max_iterations`
/// without reaching a stop condition.
const ITERATION_CAP_MARKER: &str = "\n\n_[stopped: reached the tool-call iteration limit]_";
/// Appended when a tool call is abandoned mid-flight due to cancellation.
const CANCELLED_MARKER: &str = "[cancelled]";

/// Configuration for the exec tool.
#[derive(Clone, Debug)]
pub struct ExecToolConfig {
    /// Timeout in seconds (default 60).
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    /// Message bus for inbound/outbound messages.
    bus: Arc<MessageBus>,
    /// LLM provider.
    provider: Arc<dyn LlmProvider>,
    /// Workspace root.
    workspace: PathBuf,
    /// Model to use (overrides provider default if set).
    model: String,
    /// Max LLM ↔ tool iterations per message.
    max_iterations: usize,
    /// Approximate context window (tokens), used by the summarization trigger.
    context_window_tokens: usize,
    /// LLM request config (temperature, max_tokens).
    request_config: LlmRequestConfig,
    /// Tool registry.
    tools: ToolRegistry,
    /// Context builder.
    context: ContextBuilder,
    /// Session manager (also owns per-key single-flight + cancellation).
    /// `Arc`-shared so multiple `AgentLoop`s (one per registry agent in the
    /// HTTP gateway's pool) can observe and cancel each other's in-flight
    /// runs through the same per-session single-flight map.
    sessions: Arc<SessionManager>,
    /// Reference to the message tool (for set_context).
    message_tool: Arc<MessageTool>,
    /// Spawn tool reference (for set_context).
    spawn_tool: Arc<SpawnTool>,
    /// Subagent manager (also held by SpawnTool; kept for direct access).
    #[allow(dead_code)]
    subagent_manager: Arc<SubagentManager>,
}

impl AgentLoop {
    /// Create a new agent loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        model: Option<String>,
        max_iterations: Option<usize>,
        request_config: Option<LlmRequestConfig>,
        brave_api_key: Option<String>,
        exec_config: Option<ExecToolConfig>,
        restrict_to_workspace: bool,
        session_manager: Option<Arc<SessionManager>>,
        agent_name: Option<String>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let request_config = request_config.unwrap_or_default();
        let exec_config = exec_config.unwrap_or_default();
        let agent_name = agent_name.unwrap_or_else(|| "Corvus".into());
        let sessions =
            session_manager.unwrap_or_else(|| Arc::new(SessionManager::new(None).expect("failed to create session manager")));

        let context = ContextBuilder::new(&workspace, &agent_name);

        let mut tools = ToolRegistry::new();
        let allowed_dir = if restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            workspace.clone(),
            Some(exec_config.timeout),
            restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let message_tool = Arc::new(MessageTool::new(None));
        tools.register(message_tool.clone());

        let subagent_manager = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace.clone(),
            bus.clone(),
            model.clone(),
            brave_api_key,
            exec_config,
            restrict_to_workspace,
            request_config.clone(),
        ));

        let spawn_tool = Arc::new(SpawnTool::new(subagent_manager.clone()));
        tools.register(spawn_tool.clone());

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            workspace,
            model,
            max_iterations,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            request_config,
            tools,
            context,
            sessions,
            message_tool,
            spawn_tool,
            subagent_manager,
        }
    }

    /// Override the context window used for the summarization trigger.
    pub fn with_context_window_tokens(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    /// Run the event loop: poll inbound messages and spawn a short-lived
    /// task per message, so a slow turn on one session key never blocks
    /// dispatch for any other session key. Same-key serialization is still
    /// enforced by `SessionManager::try_begin_run`'s single-flight guard.
    pub async fn run(self: Arc<Self>) {
        info!("agent loop started, waiting for messages");
        loop {
            match self.bus.consume_inbound().await {
                Some(msg) => {
                    let session_key = msg.session_key();
                    debug!(session_key = %session_key, "received message");

                    let this = self.clone();
                    tokio::spawn(async move {
                        let result = if msg.channel == "system" && msg.sender_id == "subagent" {
                            this.process_system_message(&msg).await
                        } else {
                            this.process_message(&msg).await
                        };

                        match result {
                            Ok(response) => {
                                if let Err(e) = this.bus.publish_outbound(response).await {
                                    error!(error = %e, "failed to publish outbound message");
                                }
                            }
                            Err(e) if e.downcast_ref::<AgentError>() == Some(&AgentError::Busy) => {
                                debug!(session_key = %session_key, "rejected concurrent dispatch (busy)");
                            }
                            Err(e) => {
                                error!(error = %e, session_key = %session_key, "message processing error");
                                let err_msg = OutboundMessage::new(
                                    &msg.channel,
                                    &msg.chat_id,
                                    &format!("I encountered an error: {e}"),
                                );
                                let _ = this.bus.publish_outbound(err_msg).await;
                            }
                        }
                    });
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Process a single inbound message → outbound response.
    ///
    /// Channels/CLI path: intercepts `/`-prefixed slash commands before
    /// dispatching to the LLM ↔ tool loop. The HTTP gateway calls
    /// [`AgentLoop::process_message_no_commands`] directly, which skips
    /// interception per the external-interfaces contract.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();

        if let Some(content) = msg.content.strip_prefix('/') {
            if let Some(reply) = self.handle_command(&session_key, content).await {
                return Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, &reply));
            }
        }

        self.process_message_no_commands(msg).await
    }

    /// Core single-flight-guarded dispatch, without slash-command interception.
    pub async fn process_message_no_commands(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();

        let cancel = match self.sessions.try_begin_run(&session_key) {
            Some(token) => token,
            None => return Err(AgentError::Busy.into()),
        };

        self.message_tool.set_context(&msg.channel, &msg.chat_id).await;
        self.spawn_tool.set_context(&msg.channel, &msg.chat_id).await;

        let username = msg.metadata.get("username").map(|s| s.as_str());
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();

        let result = self
            .run_turns(
                &session_key,
                &msg.content,
                &media_paths,
                &msg.channel,
                &msg.chat_id,
                username,
                &cancel,
                None,
            )
            .await;

        self.sessions.end_run(&session_key);

        result.map(|content| OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
    }

    /// Gateway entry point: identical dispatch contract to
    /// [`AgentLoop::process_message_no_commands`] (no slash-command
    /// interception, same single-flight rejection), but the terminal,
    /// non-tool-calling turn is delivered to `on_delta` as it is produced
    /// instead of only being returned once complete. Every turn that
    /// resolves tool calls still runs non-streaming — tool mechanics are
    /// never surfaced to the caller.
    pub async fn process_message_streaming(
        &self,
        msg: &InboundMessage,
        mut on_delta: impl FnMut(ChatStreamDelta) + Send,
    ) -> Result<OutboundMessage> {
        let session_key = msg.session_key();

        let cancel = match self.sessions.try_begin_run(&session_key) {
            Some(token) => token,
            None => return Err(AgentError::Busy.into()),
        };

        self.message_tool.set_context(&msg.channel, &msg.chat_id).await;
        self.spawn_tool.set_context(&msg.channel, &msg.chat_id).await;

        let username = msg.metadata.get("username").map(|s| s.as_str());
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();

        let result = self
            .run_turns(
                &session_key,
                &msg.content,
                &media_paths,
                &msg.channel,
                &msg.chat_id,
                username,
                &cancel,
                Some(&mut on_delta),
            )
            .await;

        self.sessions.end_run(&session_key);

        result.map(|content| OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
    }

    /// The LLM ↔ tool iteration loop shared by the channel/CLI path, the
    /// subagent-result ("system message") path, and the streaming gateway
    /// path. `on_delta`, when present, receives the terminal turn's content
    /// as a single delta once it is known — real incremental forwarding
    /// happens at the provider layer (`LlmProvider::chat_stream`); here it
    /// only ever applies to the one turn that has no tool calls to hide.
    #[allow(clippy::too_many_arguments)]
    async fn run_turns(
        &self,
        session_key: &str,
        user_text: &str,
        media_paths: &[String],
        channel: &str,
        chat_id: &str,
        username: Option<&str>,
        cancel: &CancellationToken,
        mut on_delta: Option<&mut (dyn FnMut(ChatStreamDelta) + Send)>,
    ) -> Result<String> {
        self.sessions
            .maybe_summarize(session_key, self.context_window_tokens, |prefix| async move {
                self.summarize_prefix(&prefix).await
            })
            .await;

        let history = self.sessions.get_history(session_key, 50);
        let mut messages = self
            .context
            .build_messages(&history, user_text, media_paths, channel, chat_id, username);

        self.sessions.add_message(session_key, Message::user(user_text));

        let tool_defs = self.tools.get_definitions();

        let mut final_content: Option<String> = None;
        let mut hit_iteration_cap = false;
        let mut was_cancelled = false;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                was_cancelled = true;
                break;
            }

            debug!(iteration = iteration, session_key = %session_key, "LLM call");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                response = self.provider.chat(&messages, Some(&tool_defs), &self.model, &self.request_config) => response,
            };

            match response.finish_reason.as_deref() {
                Some("length") => {
                    if let Some(cb) = on_delta.as_deref_mut() {
                        cb(ChatStreamDelta {
                            content: response.content.clone(),
                            finish_reason: response.finish_reason.clone(),
                        });
                    }
                    final_content = response.content.clone();
                    break;
                }
                _ if response.has_tool_calls() => {
                    let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                    ContextBuilder::add_assistant_message(
                        &mut messages,
                        response.content.clone(),
                        tool_calls.clone(),
                    );
                    self.sessions.add_message(
                        session_key,
                        Message::assistant_tool_calls(tool_calls.clone()),
                    );

                    for tc in &tool_calls {
                        if cancel.is_cancelled() {
                            was_cancelled = true;
                            ContextBuilder::add_tool_result(&mut messages, &tc.id, CANCELLED_MARKER);
                            self.sessions.add_message(
                                session_key,
                                Message::tool_result(&tc.id, CANCELLED_MARKER),
                            );
                            continue;
                        }

                        let params: HashMap<String, serde_json::Value> =
                            serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                        info!(tool = %tc.function.name, iteration = iteration, "executing tool call");

                        let result = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                was_cancelled = true;
                                CANCELLED_MARKER.to_string()
                            }
                            result = self.tools.execute(&tc.function.name, params) => result,
                        };

                        debug!(tool = %tc.function.name, result_len = result.len(), "tool result");
                        ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                        self.sessions
                            .add_message(session_key, Message::tool_result(&tc.id, &result));
                    }

                    if was_cancelled {
                        break;
                    }
                }
                _ => {
                    if let Some(cb) = on_delta.as_deref_mut() {
                        cb(ChatStreamDelta {
                            content: response.content.clone(),
                            finish_reason: response.finish_reason.clone(),
                        });
                    }
                    final_content = response.content;
                    break;
                }
            }

            if iteration == self.max_iterations - 1 {
                hit_iteration_cap = true;
            }
        }

        let mut content = final_content.unwrap_or_else(|| {
            "I've completed processing but have no response to give.".to_string()
        });

        if was_cancelled {
            self.sessions
                .add_message(session_key, Message::assistant("[cancelled by user]"));
            return Err(AgentError::Cancelled.into());
        }

        if hit_iteration_cap {
            content.push_str(ITERATION_CAP_MARKER);
        }

        self.sessions.add_message(session_key, Message::assistant(&content));

        Ok(content)
    }

    /// Summarize a message prefix via a single provider call (no tools).
    async fn summarize_prefix(&self, prefix: &[Message]) -> Result<String> {
        let mut messages = vec![Message::system(
            "Summarize the following conversation prefix concisely, preserving any facts, \
             decisions, and open threads a continuation would need. Respond with the summary \
             text only.",
        )];
        messages.extend_from_slice(prefix);

        let response = self
            .provider
            .chat(&messages, None, &self.model, &self.request_config)
            .await;

        response
            .content
            .ok_or_else(|| anyhow::anyhow!("provider returned no summary content"))
    }

    /// Recognized slash commands. Returns `Some(reply)` when handled.
    async fn handle_command(&self, session_key: &str, content: &str) -> Option<String> {
        let mut parts = content.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");

        match command {
            "new" | "restart" => {
                self.sessions.clear(session_key);
                Some("Started a new conversation.".to_string())
            }
            "stop" => {
                let outcome = self.sessions.stop(session_key);
                Some(match outcome {
                    corvus_core::session::manager::StopOutcome::Stopped => {
                        "Stopped the in-flight request.".to_string()
                    }
                    corvus_core::session::manager::StopOutcome::Idle => {
                        "Nothing is running right now.".to_string()
                    }
                })
            }
            "status" => {
                let session = self.sessions.get_or_create(session_key);
                Some(format!(
                    "Model: {}\nMessages in this session: {}",
                    self.model,
                    session.messages.len()
                ))
            }
            "help" => Some(
                "Available commands:\n\
                 /new — start a new conversation\n\
                 /stop — cancel the in-flight request\n\
                 /status — show model and session size\n\
                 /restart — alias for /new\n\
                 /help — show this message"
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Process a system message (from a subagent or cron).
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(sender = %msg.sender_id, chat_id = %msg.chat_id, "processing system message");

        let (origin_channel, origin_chat_id) = match msg.chat_id.split_once(':') {
            Some((ch, cid)) => (ch.to_string(), cid.to_string()),
            None => {
                return Err(anyhow::anyhow!(
                    "Invalid system message chat_id format: {}",
                    msg.chat_id
                ));
            }
        };

        let session_key = format!("{origin_channel}:{origin_chat_id}");

        let cancel = match self.sessions.try_begin_run(&session_key) {
            Some(token) => token,
            None => return Err(AgentError::Busy.into()),
        };

        self.message_tool.set_context(&origin_channel, &origin_chat_id).await;
        self.spawn_tool.set_context(&origin_channel, &origin_chat_id).await;

        let result = self
            .run_turns(
                &session_key,
                &msg.content,
                &[],
                &origin_channel,
                &origin_chat_id,
                None,
                &cancel,
                None,
            )
            .await;

        self.sessions.end_run(&session_key);

        result.map(|content| OutboundMessage::new(&origin_channel, &origin_chat_id, &content))
    }

    /// Direct processing mode (CLI entry point).
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    /// Get a reference to the tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get a reference to the session manager (for gateway/CLI session routes).
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
