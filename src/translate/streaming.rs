//! State machine turning provider stream frames into canonical stream events.
//!
//! Each translator decodes its own frames into [`ChunkSignal`]s; the
//! [`StreamNormalizer`] owns the lifecycle (`Started → Delta* → Done`), assigns
//! one response id and per-message ids, and guarantees exactly one `done`.
//! A stream that ends without the provider's completion marker yields an
//! error, never a synthetic `done`.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use super::canonical::{new_id, ResponseStatus, StreamEvent};
use super::errors::{normalize, CanonicalError, RawError};
use super::Translator;
use crate::audit::{AuditKind, AuditSink};
use crate::providers::ProviderKind;

/// Canonical event stream handed to callers.
pub type EventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<StreamEvent, CanonicalError>> + Send>>;

/// Raw provider frame: an SSE event or one NDJSON line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub event: Option<String>,
    pub data: String,
}

impl StreamFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// What a decoded provider frame means, independent of provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSignal {
    /// Provider-assigned response id; only honoured before the first event.
    ResponseId(String),
    TextDelta(String),
    /// A non-text item (tool call) interrupted the message; the next text
    /// belongs to a new message.
    MessageBoundary,
    /// Terminal status to report with `done`.
    Status(ResponseStatus),
    /// The provider's completion marker.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Started,
    Streaming,
    Done,
}

#[derive(Debug)]
pub struct StreamNormalizer {
    state: StreamState,
    response_id: String,
    message_id: Option<String>,
    status: ResponseStatus,
    transcript: Vec<StreamEvent>,
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamNormalizer {
    pub fn new() -> Self {
        Self {
            state: StreamState::Started,
            response_id: new_id("resp"),
            message_id: None,
            status: ResponseStatus::Completed,
            transcript: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == StreamState::Done
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// Every event emitted so far.
    pub fn transcript(&self) -> &[StreamEvent] {
        &self.transcript
    }

    /// Apply one frame's signals, returning the events to emit. Nothing is
    /// emitted once `done` has been.
    pub fn apply(&mut self, signals: Vec<ChunkSignal>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for signal in signals {
            if self.is_done() {
                break;
            }
            match signal {
                ChunkSignal::ResponseId(id) => {
                    if self.state == StreamState::Started && !id.is_empty() {
                        self.response_id = id;
                    }
                }
                ChunkSignal::TextDelta(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.state = StreamState::Streaming;
                    let message_id = self
                        .message_id
                        .get_or_insert_with(|| new_id("msg"))
                        .clone();
                    events.push(StreamEvent::Delta {
                        response_id: self.response_id.clone(),
                        message_id,
                        text,
                    });
                }
                ChunkSignal::MessageBoundary => self.message_id = None,
                ChunkSignal::Status(status) => self.status = status,
                ChunkSignal::Completed => {
                    self.state = StreamState::Done;
                    events.push(StreamEvent::Done {
                        response_id: self.response_id.clone(),
                        status: self.status,
                    });
                }
            }
        }
        self.transcript.extend(events.iter().cloned());
        events
    }

    /// Audit payload for a completed stream.
    fn transcript_payload(&self) -> serde_json::Value {
        let text: String = self
            .transcript
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { text, .. } => Some(text.as_str()),
                StreamEvent::Done { .. } => None,
            })
            .collect();
        serde_json::json!({
            "response_id": self.response_id,
            "status": self.status,
            "output_text": text,
            "events": self.transcript,
        })
    }
}

/// Drive `frames` through `T`'s decoder and the normalizer. `decoder` is the
/// translator's per-stream state (see [`Translator::decoder_state`]).
///
/// The transcript is written to `sink` as `RES` (and the raw frames as
/// `RES-RAW`) only when `done` is emitted; an aborted stream leaves no
/// partial audit record.
pub fn normalize_stream<T, S>(
    frames: S,
    mut decoder: T::DecoderState,
    sink: Arc<dyn AuditSink>,
) -> EventStream
where
    T: Translator + 'static,
    S: Stream<Item = std::result::Result<StreamFrame, CanonicalError>> + Send + 'static,
{
    let provider = T::PROVIDER;
    Box::pin(async_stream::stream! {
        let mut normalizer = StreamNormalizer::new();
        let mut raw_frames = Vec::new();

        tokio::pin!(frames);

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "stream transport failed");
                    yield Err(e);
                    return;
                }
            };

            let signals = match T::decode_stream_frame(&frame, &mut decoder) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "provider reported a stream error");
                    yield Err(e);
                    return;
                }
            };
            raw_frames.push(frame.data);

            for event in normalizer.apply(signals) {
                yield Ok(event);
            }

            if normalizer.is_done() {
                sink.write(&serde_json::json!(raw_frames), AuditKind::ResRaw, provider.as_str());
                sink.write(&normalizer.transcript_payload(), AuditKind::Res, provider.as_str());
                tracing::info!(
                    provider = %provider,
                    response_id = normalizer.response_id(),
                    events = normalizer.transcript().len(),
                    "stream completed"
                );
                return;
            }
        }

        tracing::warn!(provider = %provider, "stream ended before completion");
        yield Err(CanonicalError::api_error("stream ended before completion", provider.as_str())
            .with_code("stream_incomplete"));
    })
}

/// Split an SSE byte stream into frames.
pub fn sse_frames<S, E>(
    bytes: S,
    provider: ProviderKind,
) -> impl Stream<Item = std::result::Result<StreamFrame, CanonicalError>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<RawError> + std::fmt::Display + Send + 'static,
{
    bytes.eventsource().map(move |event| match event {
        Ok(event) => Ok(StreamFrame {
            event: (!event.event.is_empty() && event.event != "message").then_some(event.event),
            data: event.data,
        }),
        Err(eventsource_stream::EventStreamError::Transport(e)) => Err(normalize(e.into(), provider)),
        Err(other) => Err(normalize(RawError::Message(other.to_string()), provider)),
    })
}

/// Split a newline-delimited JSON byte stream into frames.
pub fn ndjson_frames<S, E>(
    bytes: S,
    provider: ProviderKind,
) -> impl Stream<Item = std::result::Result<StreamFrame, CanonicalError>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<RawError> + Send + 'static,
{
    async_stream::stream! {
        // Raw bytes: a chunk may end inside a multi-byte character.
        let mut buffer: Vec<u8> = Vec::new();

        tokio::pin!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(normalize(e.into(), provider));
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                match decode_line(line, provider) {
                    Ok(Some(frame)) => {
                        yield Ok(frame);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        match decode_line(buffer, provider) {
            Ok(Some(frame)) => {
                yield Ok(frame);
            }
            Ok(None) => {}
            Err(e) => {
                yield Err(e);
            }
        }
    }
}

/// One complete NDJSON line as a frame; blank lines yield nothing.
fn decode_line(
    line: Vec<u8>,
    provider: ProviderKind,
) -> std::result::Result<Option<StreamFrame>, CanonicalError> {
    let line = String::from_utf8(line).map_err(|e| {
        tracing::warn!(provider = %provider, error = %e, "stream line is not valid UTF-8");
        normalize(RawError::Message(format!("invalid UTF-8 in stream: {e}")), provider)
    })?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| StreamFrame::data(line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::JsonlAuditSink;
    use crate::translate::OpenAiTranslator;

    fn openai_delta(text: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-42",
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        })
        .to_string()
    }

    fn openai_finish() -> String {
        serde_json::json!({
            "id": "chatcmpl-42",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })
        .to_string()
    }

    fn frames(
        data: Vec<String>,
    ) -> impl Stream<Item = std::result::Result<StreamFrame, CanonicalError>> + Send + 'static {
        futures::stream::iter(data.into_iter().map(|d| Ok(StreamFrame::data(d))))
    }

    #[test]
    fn test_five_deltas_then_one_done() {
        let mut data: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|t| openai_delta(t)).collect();
        data.push(openai_finish());
        data.push("[DONE]".to_string());

        let log = JsonlAuditSink::in_memory();
        let stream = normalize_stream::<OpenAiTranslator, _>(frames(data), (), Arc::new(log.clone()));
        let events: Vec<_> = tokio_test::block_on(stream.collect::<Vec<_>>())
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 6);
        assert!(events[..5].iter().all(|e| matches!(e, StreamEvent::Delta { .. })));
        assert!(matches!(
            events[5],
            StreamEvent::Done { status: ResponseStatus::Completed, .. }
        ));
        assert!(events.iter().all(|e| e.response_id() == "chatcmpl-42"));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AuditKind::Res);
        assert_eq!(recent[0].payload["output_text"], "abcde");
        assert_eq!(recent[1].kind, AuditKind::ResRaw);
    }

    #[test]
    fn test_dropped_stream_is_an_error_not_done() {
        let data = vec![openai_delta("partial")];

        let log = JsonlAuditSink::in_memory();
        let stream = normalize_stream::<OpenAiTranslator, _>(frames(data), (), Arc::new(log.clone()));
        let items = tokio_test::block_on(stream.collect::<Vec<_>>());

        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(StreamEvent::Delta { .. })));
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.code.as_deref(), Some("stream_incomplete"));
        assert!(!items.iter().any(|i| matches!(i, Ok(StreamEvent::Done { .. }))));
        assert!(log.recent(10).is_empty());
    }

    #[test]
    fn test_message_boundary_starts_new_message() {
        let mut normalizer = StreamNormalizer::new();
        let first = normalizer.apply(vec![ChunkSignal::TextDelta("before".to_string())]);
        normalizer.apply(vec![ChunkSignal::MessageBoundary]);
        let second = normalizer.apply(vec![ChunkSignal::TextDelta("after".to_string())]);

        let id = |events: &[StreamEvent]| match &events[0] {
            StreamEvent::Delta { message_id, .. } => message_id.clone(),
            StreamEvent::Done { .. } => panic!("expected delta"),
        };
        assert_ne!(id(&first), id(&second));
    }

    #[test]
    fn test_nothing_after_done() {
        let mut normalizer = StreamNormalizer::new();
        let events = normalizer.apply(vec![
            ChunkSignal::Status(ResponseStatus::Incomplete),
            ChunkSignal::Completed,
            ChunkSignal::TextDelta("late".to_string()),
        ]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Done { status: ResponseStatus::Incomplete, .. }
        ));
        assert!(normalizer.apply(vec![ChunkSignal::Completed]).is_empty());
        assert_eq!(normalizer.state(), StreamState::Done);
    }

    #[test]
    fn test_response_id_fixed_after_first_event() {
        let mut normalizer = StreamNormalizer::new();
        normalizer.apply(vec![ChunkSignal::ResponseId("resp_a".to_string())]);
        normalizer.apply(vec![ChunkSignal::TextDelta("x".to_string())]);
        normalizer.apply(vec![ChunkSignal::ResponseId("resp_b".to_string())]);
        assert_eq!(normalizer.response_id(), "resp_a");
    }

    #[test]
    fn test_sse_frames_parse_events() {
        let body = "event: message_start\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";
        let bytes = futures::stream::iter(vec![Ok::<_, CanonicalError>(Bytes::from(body))]);
        let parsed: Vec<_> = tokio_test::block_on(
            sse_frames(bytes, ProviderKind::Anthropic).collect::<Vec<_>>(),
        );

        assert_eq!(parsed.len(), 2);
        let first = parsed[0].as_ref().unwrap();
        assert_eq!(first.event.as_deref(), Some("message_start"));
        assert_eq!(first.data, "{\"a\":1}");
        assert_eq!(parsed[1].as_ref().unwrap().event, None);
    }

    #[test]
    fn test_ndjson_lines_split_across_chunks() {
        let chunks = vec![
            Ok::<_, CanonicalError>(Bytes::from("{\"message\":{\"content\":\"He\"}")),
            Ok(Bytes::from(",\"done\":false}\n{\"done\":true}")),
        ];
        let parsed: Vec<_> = tokio_test::block_on(
            ndjson_frames(futures::stream::iter(chunks), ProviderKind::Ollama).collect::<Vec<_>>(),
        );

        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0].as_ref().unwrap().data,
            "{\"message\":{\"content\":\"He\"},\"done\":false}"
        );
        assert_eq!(parsed[1].as_ref().unwrap().data, "{\"done\":true}");
    }

    #[test]
    fn test_ndjson_multibyte_char_split_across_chunks() {
        let line = "{\"message\":{\"content\":\"café\"},\"done\":false}\n".as_bytes();
        // split between the two bytes of 'é'
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let chunks = vec![
            Ok::<_, CanonicalError>(Bytes::copy_from_slice(&line[..split])),
            Ok(Bytes::copy_from_slice(&line[split..])),
        ];
        let parsed: Vec<_> = tokio_test::block_on(
            ndjson_frames(futures::stream::iter(chunks), ProviderKind::Ollama).collect::<Vec<_>>(),
        );

        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed[0].as_ref().unwrap().data,
            "{\"message\":{\"content\":\"café\"},\"done\":false}"
        );
    }

    #[test]
    fn test_ndjson_invalid_utf8_is_an_error() {
        let chunks = vec![Ok::<_, CanonicalError>(Bytes::from_static(b"{\"done\":\xFF}\n"))];
        let parsed: Vec<_> = tokio_test::block_on(
            ndjson_frames(futures::stream::iter(chunks), ProviderKind::Ollama).collect::<Vec<_>>(),
        );

        assert_eq!(parsed.len(), 1);
        let err = parsed[0].as_ref().unwrap_err();
        assert_eq!(err.provider, "ollama");
        assert!(err.message.contains("UTF-8"));
    }
}
