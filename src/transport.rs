//! HTTP plumbing per provider: endpoint, auth headers, and stream framing.
//!
//! A [`ProviderHandle`] is immutable once built; the Dispatch Client creates one
//! lazily per provider and shares it across requests.

use std::pin::Pin;

use futures::Stream;
use serde::Serialize;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::providers::ProviderKind;
use crate::translate::anthropic::ANTHROPIC_VERSION;
use crate::translate::errors::{normalize, CanonicalError, RawError};
use crate::translate::streaming::{ndjson_frames, sse_frames, StreamFrame};

pub type FrameStream =
    Pin<Box<dyn Stream<Item = std::result::Result<StreamFrame, CanonicalError>> + Send>>;

#[derive(Debug)]
pub struct ProviderHandle {
    kind: ProviderKind,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ProviderHandle {
    /// Resolve base URL and credentials for `kind`. Fails when a required
    /// API key variable is unset.
    pub fn new(kind: ProviderKind, config: &BridgeConfig, client: reqwest::Client) -> Result<Self> {
        let api_key = config.resolve_api_key(kind)?;
        let base_url = config.effective_base_url(kind);
        tracing::debug!(provider = %kind, base_url = %base_url, "provider handle ready");
        Ok(Self {
            kind,
            client,
            base_url,
            api_key,
        })
    }

    pub fn endpoint(&self, model: &str, stream: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.kind {
            ProviderKind::OpenAi => format!("{base}/chat/completions"),
            ProviderKind::Anthropic => format!("{base}/v1/messages"),
            ProviderKind::Google if stream => {
                format!("{base}/models/{model}:streamGenerateContent?alt=sse")
            }
            ProviderKind::Google => format!("{base}/models/{model}:generateContent"),
            ProviderKind::Ollama => format!("{base}/api/chat"),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(key) = self.api_key.as_deref() else {
            return builder;
        };
        match self.kind {
            ProviderKind::OpenAi => builder.bearer_auth(key),
            ProviderKind::Anthropic => builder
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ProviderKind::Google => builder.header("x-goog-api-key", key),
            ProviderKind::Ollama => builder,
        }
    }

    /// POST `body` and return the response if it succeeded. Transport failures
    /// and non-2xx replies come back normalized.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        model: &str,
        stream: bool,
        body: &B,
    ) -> std::result::Result<reqwest::Response, CanonicalError> {
        let url = self.endpoint(model, stream);
        tracing::info!(provider = %self.kind, model, stream, url = %url, "POST");

        let mut builder = self.client.post(&url).json(body);
        // anthropic-version is required even when no key is sent
        if self.api_key.is_none() && self.kind == ProviderKind::Anthropic {
            builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        }
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| normalize(RawError::from(e), self.kind))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = %self.kind, status = status.as_u16(), "provider returned an error");
        Err(normalize(
            RawError::Http {
                status: status.as_u16(),
                body,
            },
            self.kind,
        ))
    }

    /// Split a streaming response body into frames: NDJSON for Ollama, SSE otherwise.
    pub fn frames(&self, response: reqwest::Response) -> FrameStream {
        let bytes = response.bytes_stream();
        match self.kind {
            ProviderKind::Ollama => Box::pin(ndjson_frames(bytes, self.kind)),
            _ => Box::pin(sse_frames(bytes, self.kind)),
        }
    }
}
