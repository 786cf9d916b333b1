//! `POST /v1/chat/completions` — OpenAI-compatible, streaming or not.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use corvus_core::bus::types::InboundMessage;
use corvus_core::types::MessageContent;
use corvus_providers::traits::ChatStreamDelta;

use crate::state::{AppState, GatewayError};

const DEFAULT_AGENT: &str = "default";

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    #[allow(dead_code)]
    role: String,
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequestBody {
    #[serde(default)]
    model: Option<String>,
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    stream: Option<bool>,
}

fn extract_last_user_text(messages: &[IncomingMessage]) -> Option<String> {
    messages.iter().rev().find_map(|m| match &m.content {
        MessageContent::Text(s) => Some(s.clone()),
        MessageContent::Parts(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|p| match p {
                    corvus_core::types::ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
    })
}

fn resolve_channel_and_session(headers: &HeaderMap, agent: &str) -> (String, String) {
    let key = headers
        .get("x-session-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("web:{agent}"));

    match key.split_once(':') {
        Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
        None => ("web".to_string(), key),
    }
}

fn resolve_agent(headers: &HeaderMap) -> String {
    headers
        .get("x-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_AGENT.to_string())
}

#[derive(Serialize)]
struct NonStreamingChoice {
    index: u32,
    message: NonStreamingMessage,
    finish_reason: String,
}

#[derive(Serialize)]
struct NonStreamingMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct NonStreamingResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<NonStreamingChoice>,
}

fn chunk(id: &str, model: &str, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequestBody>,
) -> Response {
    let agent_name = resolve_agent(&headers);
    let (channel, chat_id) = resolve_channel_and_session(&headers, &agent_name);
    let model = body.model.clone().unwrap_or_else(|| agent_name.clone());

    let text = match extract_last_user_text(&body.messages) {
        Some(t) => t,
        None => {
            return GatewayError::BadRequest("no user message with text content found".to_string())
                .into_response()
        }
    };

    let agent = match state.agent_loop(&agent_name) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };

    let msg = InboundMessage::new(channel, "http-client", chat_id, text);

    if body.stream.unwrap_or(false) {
        stream_response(agent, msg, model).into_response()
    } else {
        let result = agent.process_message_no_commands(&msg).await;
        match result {
            Ok(outbound) => {
                let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
                Json(NonStreamingResponse {
                    id,
                    object: "chat.completion",
                    created: chrono::Utc::now().timestamp(),
                    model,
                    choices: vec![NonStreamingChoice {
                        index: 0,
                        message: NonStreamingMessage {
                            role: "assistant",
                            content: outbound.content,
                        },
                        finish_reason: "stop".to_string(),
                    }],
                })
                .into_response()
            }
            Err(e) if e.downcast_ref::<corvus_agent::AgentError>() == Some(&corvus_agent::AgentError::Busy) => {
                GatewayError::Busy.into_response()
            }
            Err(e) => GatewayError::Internal(e).into_response(),
        }
    }
}

fn stream_response(
    agent: Arc<corvus_agent::AgentLoop>,
    msg: InboundMessage,
    model: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let (tx, rx) = mpsc::unbounded_channel::<ChatStreamDelta>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<(), String>>();

    tokio::spawn(async move {
        let result = agent
            .process_message_streaming(&msg, move |delta| {
                let _ = tx.send(delta);
            })
            .await;
        let outcome = match result {
            Ok(_) => Ok(()),
            Err(e) if e.downcast_ref::<corvus_agent::AgentError>() == Some(&corvus_agent::AgentError::Busy) => {
                Err("agent is busy with another request".to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        let _ = done_tx.send(outcome);
    });

    let role_event = Event::default().data(
        serde_json::to_string(&chunk(&id, &model, json!({"role": "assistant"}), None)).unwrap(),
    );

    let tail_id = id.clone();
    let tail_model = model.clone();

    let delta_stream = UnboundedReceiverStream::new(rx).map(move |delta| {
        let data = chunk(
            &id,
            &model,
            json!({ "content": delta.content.unwrap_or_default() }),
            None,
        );
        Event::default().data(serde_json::to_string(&data).unwrap())
    });

    let tail_stream = async_stream_tail(done_rx, tail_id, tail_model);

    let body = tokio_stream::iter(vec![role_event])
        .chain(delta_stream)
        .chain(tail_stream);

    Sse::new(body).keep_alive(KeepAlive::default())
}

/// Yields the final `finish_reason=stop` chunk (or an error chunk) once the
/// agent-loop task signals completion, then the literal `[DONE]` terminator.
fn async_stream_tail(
    mut done_rx: mpsc::UnboundedReceiver<Result<(), String>>,
    id: String,
    model: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream_once(async move {
        let outcome = done_rx.recv().await.unwrap_or(Ok(()));
        let mut events = Vec::new();
        match outcome {
            Ok(()) => {
                events.push(Event::default().data(
                    serde_json::to_string(&chunk(&id, &model, json!({}), Some("stop"))).unwrap(),
                ));
            }
            Err(msg) => {
                events.push(Event::default().event("error").data(
                    serde_json::to_string(&json!({ "error": { "message": msg } })).unwrap(),
                ));
            }
        }
        events.push(Event::default().data("[DONE]"));
        events
    })
}

/// Runs an async block that produces a `Vec<Event>` once, then streams its
/// items. Used instead of pulling in `async-stream`'s macro for a single
/// tail sequence.
fn async_stream_once<F>(fut: F) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: std::future::Future<Output = Vec<Event>> + Send + 'static,
{
    futures_util::stream::once(fut).flat_map(|events| tokio_stream::iter(events).map(Ok))
}
