//! LLM Provider trait — the core abstraction covering any OpenAI-compatible API.
//!
//! `HttpProvider` in `http_provider.rs` is the main implementation.

use async_trait::async_trait;
use corvus_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;

/// Configuration passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// One incremental delta from a streaming chat completion.
///
/// Streaming is only ever used on the final, non-tool-calling turn — tool
/// mechanics are never surfaced to a streaming client. A delta sequence
/// ends either with `finish_reason` set, or implicitly when the stream
/// closes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatStreamDelta {
    /// Incremental content fragment, if any arrived in this event.
    pub content: Option<String>,
    /// Set on the terminal event (`"stop"`, `"length"`, …).
    pub finish_reason: Option<String>,
}

/// A boxed callback invoked once per streaming delta.
pub type ChatStreamCallback<'a> = Box<dyn FnMut(ChatStreamDelta) + Send + 'a>;

/// Trait that all LLM providers must implement.
///
/// The main implementation is `HttpProvider`, which handles any
/// OpenAI-compatible API.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a non-streaming chat completion request.
    ///
    /// On API errors, returns `LlmResponse::error(...)` instead of
    /// propagating — tool-calling turns need a response object to append
    /// to history regardless of transport outcome.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse;

    /// Send a streaming chat completion request, invoking `on_delta` for
    /// each incremental chunk as it arrives. Returns the fully assembled
    /// response once the stream terminates.
    ///
    /// Unlike `chat`, transport/decode failures propagate as `Err` — no
    /// existing caller depends on this path swallowing errors into content.
    ///
    /// The default implementation falls back to a single non-streaming
    /// call and delivers it as one delta; providers that support real SSE
    /// streaming (`HttpProvider`) override this.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        mut on_delta: ChatStreamCallback<'_>,
    ) -> Result<LlmResponse, ProviderError> {
        let response = self.chat(messages, tools, model, config).await;
        on_delta(ChatStreamDelta {
            content: response.content.clone(),
            finish_reason: response.finish_reason.clone(),
        });
        Ok(response)
    }

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
