//! Provider-level errors. `chat()` folds these into `LlmResponse::error(...)`
//! content for backward compatibility with the non-streaming call sites;
//! `chat_stream()` propagates them, since nothing depends on its
//! error-swallowing behavior and the agent loop needs to distinguish a
//! transport failure from a normal end-of-stream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error calling {provider}: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("failed to parse {provider} response: {source}")]
    Decode {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed SSE event from {provider}: {0}")]
    Stream(String),
}
