//! The Dispatch Client: provider selection plus one translate, send, translate-back
//! round trip per call.
//!
//! A client is immutable. [`DispatchClient::with_provider`] builds a new client
//! instead of switching the provider in place. Provider handles are created
//! lazily on first use and shared by every clone.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::audit::{record, AuditKind, AuditSink};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::providers::ProviderKind;
use crate::transport::ProviderHandle;
use crate::translate::canonical::{CanonicalRequest, CanonicalResponse};
use crate::translate::errors::{normalize, CanonicalError, RawError};
use crate::translate::normalize::normalize_request;
use crate::translate::streaming::{normalize_stream, EventStream};
use crate::translate::{
    AnthropicTranslator, GoogleTranslator, OllamaTranslator, OpenAiTranslator, Translator,
};

type Handles = [OnceCell<Arc<ProviderHandle>>; 4];

#[derive(Clone)]
pub struct DispatchClient {
    config: Arc<BridgeConfig>,
    provider: Option<ProviderKind>,
    sink: Arc<dyn AuditSink>,
    http: reqwest::Client,
    handles: Arc<Handles>,
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

fn slot(kind: ProviderKind) -> usize {
    match kind {
        ProviderKind::OpenAi => 0,
        ProviderKind::Anthropic => 1,
        ProviderKind::Google => 2,
        ProviderKind::Ollama => 3,
    }
}

impl DispatchClient {
    pub fn new(config: BridgeConfig, sink: Arc<dyn AuditSink>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            provider: config.provider,
            config: Arc::new(config),
            sink,
            http,
            handles: Arc::new(Default::default()),
        })
    }

    /// A client that serves every model through `kind`.
    #[must_use]
    pub fn with_provider(&self, kind: ProviderKind) -> Self {
        Self {
            provider: Some(kind),
            ..self.clone()
        }
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.provider
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Explicit provider if configured, else inferred from the aliased model
    /// name, else from the name as given.
    pub fn resolve_provider(&self, model: &str) -> std::result::Result<ProviderKind, CanonicalError> {
        if let Some(kind) = self.provider {
            return Ok(kind);
        }
        ProviderKind::infer_from_model(self.config.map_model(model))
            .or_else(|| ProviderKind::infer_from_model(model))
            .ok_or_else(|| {
                CanonicalError::invalid_request(
                    format!("Cannot infer a provider for model '{model}'; configure one explicitly"),
                    "unknown",
                )
                .with_code("config_error")
                .with_param("model")
            })
    }

    /// Run one non-streaming request.
    pub async fn create(
        &self,
        mut request: CanonicalRequest,
    ) -> std::result::Result<CanonicalResponse, CanonicalError> {
        request.stream = false;
        match self.resolve_provider(&request.model)? {
            ProviderKind::OpenAi => self.create_with::<OpenAiTranslator>(request).await,
            ProviderKind::Anthropic => self.create_with::<AnthropicTranslator>(request).await,
            ProviderKind::Google => self.create_with::<GoogleTranslator>(request).await,
            ProviderKind::Ollama => self.create_with::<OllamaTranslator>(request).await,
        }
    }

    /// Like [`create`](Self::create), but failures come back as a
    /// `status=failed` response.
    pub async fn create_or_failed(&self, request: CanonicalRequest) -> CanonicalResponse {
        let model = request.model.clone();
        match self.create(request).await {
            Ok(response) => response,
            Err(error) => error.into_response(model),
        }
    }

    /// Open a streaming request. Errors before the first byte are returned
    /// here; later ones surface while iterating.
    pub async fn stream(
        &self,
        mut request: CanonicalRequest,
    ) -> std::result::Result<EventStream, CanonicalError> {
        request.stream = true;
        match self.resolve_provider(&request.model)? {
            ProviderKind::OpenAi => self.stream_with::<OpenAiTranslator>(request).await,
            ProviderKind::Anthropic => self.stream_with::<AnthropicTranslator>(request).await,
            ProviderKind::Google => self.stream_with::<GoogleTranslator>(request).await,
            ProviderKind::Ollama => self.stream_with::<OllamaTranslator>(request).await,
        }
    }

    async fn handle(
        &self,
        kind: ProviderKind,
    ) -> std::result::Result<Arc<ProviderHandle>, CanonicalError> {
        self.handles[slot(kind)]
            .get_or_try_init(|| async {
                ProviderHandle::new(kind, &self.config, self.http.clone()).map(Arc::new)
            })
            .await
            .cloned()
            .map_err(|e| e.into_canonical(kind))
    }

    /// Normalize, audit, and alias the model. Returns the request translators see.
    fn prepare(
        &self,
        request: CanonicalRequest,
        kind: ProviderKind,
    ) -> std::result::Result<CanonicalRequest, CanonicalError> {
        let mut request = normalize_request(request).map_err(|e| e.into_canonical(kind))?;
        record(self.sink.as_ref(), &request, AuditKind::Req, kind.as_str());
        let upstream = self.config.map_model(&request.model).to_string();
        if upstream != request.model {
            tracing::debug!(provider = %kind, from = %request.model, to = %upstream, "model alias");
            request.model = upstream;
        }
        Ok(request)
    }

    async fn create_with<T: Translator>(
        &self,
        request: CanonicalRequest,
    ) -> std::result::Result<CanonicalResponse, CanonicalError> {
        let kind = T::PROVIDER;
        let request = self.prepare(request, kind)?;
        let body = T::to_provider_request(&request).map_err(|e| e.into_canonical(kind))?;
        record(self.sink.as_ref(), &body, AuditKind::ReqRaw, kind.as_str());

        let handle = self.handle(kind).await?;
        let response = handle.send(&request.model, false, &body).await?;
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| normalize(RawError::from(e), kind))?;
        self.sink.write(&raw, AuditKind::ResRaw, kind.as_str());

        // Some gateways answer 200 with an error body
        if raw.get("error").is_some_and(|e| !e.is_null()) {
            return Err(normalize(RawError::Payload(raw), kind));
        }

        let parsed: T::Response =
            serde_json::from_value(raw).map_err(|e| crate::error::BridgeError::from(e).into_canonical(kind))?;
        let response = T::from_provider_response(parsed, &request);
        record(self.sink.as_ref(), &response, AuditKind::Res, kind.as_str());

        tracing::info!(
            provider = %kind,
            model = %request.model,
            status = ?response.status,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "response translated"
        );
        Ok(response)
    }

    async fn stream_with<T: Translator + 'static>(
        &self,
        request: CanonicalRequest,
    ) -> std::result::Result<EventStream, CanonicalError> {
        let kind = T::PROVIDER;
        let request = self.prepare(request, kind)?;
        let body = T::to_provider_request(&request).map_err(|e| e.into_canonical(kind))?;
        record(self.sink.as_ref(), &body, AuditKind::ReqRaw, kind.as_str());

        let handle = self.handle(kind).await?;
        let response = handle.send(&request.model, true, &body).await?;
        tracing::info!(provider = %kind, model = %request.model, "stream opened");
        Ok(normalize_stream::<T, _>(
            handle.frames(response),
            T::decoder_state(&request),
            Arc::clone(&self.sink),
        ))
    }
}
