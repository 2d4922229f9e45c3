//! Translation between the canonical Responses format and the provider wire formats.
//!
//! The core of the bridge: every provider gets a [`Translator`] that converts
//! requests, responses, and streaming frames. All translation functions are
//! pure (no I/O).

pub mod anthropic;
pub mod anthropic_types;
pub mod canonical;
pub mod errors;
pub mod google;
pub mod google_types;
pub mod normalize;
pub mod ollama;
pub mod ollama_types;
pub mod openai;
pub mod openai_types;
pub mod streaming;
pub mod structured;
pub mod tool_calls;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::providers::ProviderKind;
use canonical::{
    new_id, CanonicalRequest, CanonicalResponse, ContentBlock, ResponseReasoning, TurnContent,
};
use errors::CanonicalError;
use streaming::{ChunkSignal, StreamFrame};

pub use anthropic::AnthropicTranslator;
pub use google::GoogleTranslator;
pub use ollama::OllamaTranslator;
pub use openai::OpenAiTranslator;

/// One provider's request/response/stream translation.
pub trait Translator {
    const PROVIDER: ProviderKind;

    type Request: Serialize + Send + Sync;
    type Response: DeserializeOwned;
    /// Per-stream decoder state, created once per streaming call.
    type DecoderState: Default + Send + 'static;

    /// Canonical request → provider wire request.
    fn to_provider_request(request: &CanonicalRequest) -> Result<Self::Request>;

    /// Provider wire response → canonical response. `original` is the request
    /// that produced it (needed to undo structured-output emulation).
    fn from_provider_response(
        response: Self::Response,
        original: &CanonicalRequest,
    ) -> CanonicalResponse;

    /// Fresh decoder state for a stream opened by `request`.
    fn decoder_state(_request: &CanonicalRequest) -> Self::DecoderState {
        Default::default()
    }

    /// Decode one frame of the provider's stream. Unrecognized frames decode
    /// to no signals.
    fn decode_stream_frame(
        frame: &StreamFrame,
        state: &mut Self::DecoderState,
    ) -> std::result::Result<Vec<ChunkSignal>, CanonicalError>;
}

/// Concatenated text of a turn, ignoring tool blocks.
pub(crate) fn plain_text(content: &TurnContent) -> String {
    match content {
        TurnContent::Text(text) => text.clone(),
        TurnContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    }
}

/// Provider call id, or a fresh `call_…` id when the provider sent none.
pub(crate) fn call_id_or_new(id: Option<&str>) -> String {
    match id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => new_id("call"),
    }
}

pub(crate) fn response_reasoning(
    original: &CanonicalRequest,
    summary: Option<String>,
) -> Option<ResponseReasoning> {
    let summary = summary.filter(|s| !s.is_empty());
    if original.reasoning.is_none() && summary.is_none() {
        return None;
    }
    Some(ResponseReasoning {
        effort: original.reasoning.as_ref().and_then(|r| r.effort),
        summary,
    })
}

/// Parse a tool-call argument string into the object form some providers want.
pub(crate) fn arguments_to_object(arguments: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "value": other }),
        Err(_) if arguments.trim().is_empty() => serde_json::json!({}),
        Err(_) => serde_json::json!({ "raw": arguments }),
    }
}
