//! Canonical requests ↔ `OpenAI` Chat Completions.
//!
//! Instructions travel as a leading `system` message, tool results become
//! `tool`-role messages, and structured output maps to `response_format`.

use super::canonical::{
    CanonicalRequest, CanonicalResponse, CanonicalTurn, ContentBlock, IncompleteDetails,
    OutputContent, OutputItem, ResponseStatus, Role, ToolChoice, ToolChoiceMode, TurnContent,
    Usage,
};
use super::errors::{normalize, CanonicalError, RawError};
use super::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatFunction, ChatMessage,
    ChatTool, ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ChatToolChoiceSpecific, JsonSchemaFormat, ResponseFormat, StreamOptions,
};
use super::streaming::{ChunkSignal, StreamFrame};
use super::{call_id_or_new, normalize as input, response_reasoning, Translator};
use crate::error::Result;
use crate::providers::ProviderKind;

const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct OpenAiTranslator;

impl Translator for OpenAiTranslator {
    const PROVIDER: ProviderKind = ProviderKind::OpenAi;

    type Request = ChatCompletionRequest;
    type Response = ChatCompletionResponse;
    type DecoderState = ();

    fn to_provider_request(req: &CanonicalRequest) -> Result<ChatCompletionRequest> {
        let turns = input::turns(req)?;

        let mut messages = Vec::new();
        for turn in &turns {
            messages.append(&mut translate_turn(turn));
        }

        let tools = (!req.tools.is_empty()).then(|| {
            req.tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        });

        let response_format = req.structured_output.as_ref().map(|output| ResponseFormat {
            format_type: "json_schema".to_string(),
            json_schema: JsonSchemaFormat {
                name: output.name.clone(),
                description: output.description.clone(),
                schema: output.schema.clone(),
                strict: output.strict,
            },
        });

        let stream_options = req.stream.then_some(StreamOptions {
            include_usage: true,
        });

        Ok(ChatCompletionRequest {
            model: req.model.clone(),
            messages,
            max_completion_tokens: req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.temperature,
            top_p: req.top_p,
            stream: req.stream.then_some(true),
            stream_options,
            tools,
            tool_choice: req.tool_choice.as_ref().map(translate_tool_choice),
            response_format,
            reasoning_effort: req
                .reasoning
                .as_ref()
                .and_then(|r| r.effort)
                .map(|e| e.as_str().to_string()),
        })
    }

    fn from_provider_response(
        resp: ChatCompletionResponse,
        original: &CanonicalRequest,
    ) -> CanonicalResponse {
        let id = if resp.id.is_empty() {
            super::canonical::new_id("resp")
        } else {
            resp.id
        };
        let model = if resp.model.is_empty() {
            original.model.clone()
        } else {
            resp.model
        };

        let choice = resp.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let (status, incomplete) = map_finish_reason(finish_reason.as_deref());

        let mut response = CanonicalResponse::new(id, model, status);
        response.incomplete_details = incomplete;

        let mut reasoning_summary = None;
        if let Some(choice) = choice {
            let message = choice.message;
            reasoning_summary = message.reasoning_content;

            let mut content = Vec::new();
            if let Some(text) = message.content.filter(|t| !t.is_empty()) {
                content.push(OutputContent::OutputText { text });
            }
            if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
                content.push(OutputContent::Refusal { refusal });
            }

            let mut output = Vec::new();
            if !content.is_empty() {
                output.push(OutputItem::Message {
                    id: super::canonical::new_id("msg"),
                    role: "assistant".to_string(),
                    content,
                });
            }
            for call in message.tool_calls.unwrap_or_default() {
                output.push(OutputItem::function_call(
                    call_id_or_new(Some(&call.id)),
                    call.function.name,
                    call.function.arguments,
                ));
            }
            response.set_output(output);
        }

        if let Some(usage) = resp.usage {
            response.usage = Usage::from_counts(
                usage.prompt_tokens,
                usage.completion_tokens,
                Some(usage.total_tokens),
            );
        }
        response.reasoning = response_reasoning(original, reasoning_summary);
        response
    }

    fn decode_stream_frame(
        frame: &StreamFrame,
        _state: &mut (),
    ) -> std::result::Result<Vec<ChunkSignal>, CanonicalError> {
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(vec![ChunkSignal::Completed]);
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable OpenAI chunk");
                return Ok(Vec::new());
            }
        };
        if value.get("error").is_some() {
            return Err(normalize(RawError::Payload(value), ProviderKind::OpenAi));
        }
        let chunk: ChatCompletionChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized OpenAI chunk");
                return Ok(Vec::new());
            }
        };

        let mut signals = Vec::new();
        if !chunk.id.is_empty() {
            signals.push(ChunkSignal::ResponseId(chunk.id));
        }
        for choice in chunk.choices {
            if let Some(calls) = &choice.delta.tool_calls {
                if calls.iter().any(|c| c.id.is_some()) {
                    signals.push(ChunkSignal::MessageBoundary);
                }
            }
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                signals.push(ChunkSignal::TextDelta(text));
            }
            if let Some(reason) = choice.finish_reason {
                let (status, _) = map_finish_reason(Some(&reason));
                signals.push(ChunkSignal::Status(status));
                signals.push(ChunkSignal::Completed);
            }
        }
        Ok(signals)
    }
}

/// A canonical turn can expand to several chat messages (each tool result is
/// its own `tool` message).
fn translate_turn(turn: &CanonicalTurn) -> Vec<ChatMessage> {
    let role = role_name(turn.role);

    let blocks = match &turn.content {
        TurnContent::Text(text) => {
            let mut message = ChatMessage::text(role, text.clone());
            if turn.role == Role::Tool {
                message.tool_call_id.clone_from(&turn.call_id);
            }
            return vec![message];
        }
        TurnContent::Blocks(blocks) => blocks,
    };

    // A chat `tool` message needs a call id; loose text in a tool turn goes as `user`.
    let text_role = if turn.role == Role::Tool { "user" } else { role };
    let mut messages = Vec::new();
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::FunctionCall {
                call_id,
                name,
                arguments,
            } => tool_calls.push(ChatToolCall {
                id: call_id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            ContentBlock::FunctionCallOutput { call_id, output } => {
                // Flush anything accumulated so ordering is preserved
                if !text.is_empty() {
                    messages.push(ChatMessage::text(text_role, std::mem::take(&mut text)));
                }
                let mut message = ChatMessage::text("tool", output.clone());
                message.tool_call_id = Some(call_id.clone());
                messages.push(message);
            }
        }
    }

    if !tool_calls.is_empty() {
        messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: (!text.is_empty()).then_some(text),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        });
    } else if !text.is_empty() || messages.is_empty() {
        messages.push(ChatMessage::text(text_role, text));
    }

    messages
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn translate_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => ChatToolChoice::String("auto".to_string()),
        ToolChoice::Mode(ToolChoiceMode::Required) => {
            ChatToolChoice::String("required".to_string())
        }
        ToolChoice::Mode(ToolChoiceMode::None) => ChatToolChoice::String("none".to_string()),
        ToolChoice::Tool(reference) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction {
                name: reference.name.clone(),
            },
        }),
    }
}

fn map_finish_reason(reason: Option<&str>) -> (ResponseStatus, Option<IncompleteDetails>) {
    match reason {
        Some("length") => (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: "max_output_tokens".to_string(),
            }),
        ),
        Some("content_filter") => (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: "content_filter".to_string(),
            }),
        ),
        _ => (ResponseStatus::Completed, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical::{
        ReasoningConfig, ReasoningEffort, StructuredOutput, ToolReference, ToolSpec,
    };

    fn decode(data: &str) -> std::result::Result<Vec<ChunkSignal>, CanonicalError> {
        OpenAiTranslator::decode_stream_frame(&StreamFrame::data(data), &mut ())
    }

    #[test]
    fn test_simple_text_request() {
        let mut req = CanonicalRequest::new("gpt-4o", "Hello");
        req.instructions = Some("Be terse.".to_string());
        req.temperature = Some(0.2);

        let out = OpenAiTranslator::to_provider_request(&req).unwrap();
        assert_eq!(out.model, "gpt-4o");
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[0].content.as_deref(), Some("Be terse."));
        assert_eq!(out.messages[1].role, "user");
        assert_eq!(out.max_completion_tokens, DEFAULT_MAX_TOKENS);
        assert!(out.stream.is_none());
        assert!(out.stream_options.is_none());
    }

    #[test]
    fn test_tool_round_trip_messages() {
        let mut req = CanonicalRequest::new(
            "gpt-4o",
            vec![
                CanonicalTurn::user("What's the weather?"),
                CanonicalTurn::function_call("call_1", "get_weather", "{\"city\":\"Oslo\"}"),
                CanonicalTurn::tool_output("call_1", "rainy"),
            ],
        );
        req.tools = vec![ToolSpec {
            name: "get_weather".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        req.tool_choice = Some(ToolChoice::Tool(ToolReference {
            name: "get_weather".to_string(),
        }));

        let out = OpenAiTranslator::to_provider_request(&req).unwrap();
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].role, "assistant");
        assert!(out.messages[1].content.is_none());
        let calls = out.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(out.messages[2].role, "tool");
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("call_1"));

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["tool_choice"]["function"]["name"], "get_weather");
        assert_eq!(json["tools"][0]["type"], "function");
    }

    #[test]
    fn test_text_in_tool_turn_is_sent_as_user() {
        let turn = CanonicalTurn {
            role: Role::Tool,
            content: TurnContent::Blocks(vec![
                ContentBlock::Text {
                    text: "here is the result".to_string(),
                },
                ContentBlock::FunctionCallOutput {
                    call_id: "call_7".to_string(),
                    output: "42".to_string(),
                },
                ContentBlock::Text {
                    text: "anything else?".to_string(),
                },
            ]),
            call_id: Some("call_7".to_string()),
        };

        let messages = translate_turn(&turn);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "tool", "user"]);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_7"));
        assert!(messages
            .iter()
            .filter(|m| m.role == "tool")
            .all(|m| m.tool_call_id.is_some()));
    }

    #[test]
    fn test_structured_output_and_reasoning() {
        let mut req = CanonicalRequest::new("o3-mini", "2+2?");
        req.structured_output = Some(StructuredOutput {
            name: "math".to_string(),
            description: None,
            schema: serde_json::json!({"type": "object", "properties": {"result": {"type": "number"}}}),
            strict: true,
        });
        req.reasoning = Some(ReasoningConfig {
            effort: Some(ReasoningEffort::High),
            summary: None,
        });
        req.stream = true;
        req.max_output_tokens = Some(256);

        let out = OpenAiTranslator::to_provider_request(&req).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "math");
        assert_eq!(json["response_format"]["json_schema"]["strict"], true);
        assert_eq!(json["reasoning_effort"], "high");
        assert_eq!(json["max_completion_tokens"], 256);
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_response_with_text_and_tool_call() {
        let req = CanonicalRequest::new("gpt-4o", "hi");
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let out = OpenAiTranslator::from_provider_response(resp, &req);
        assert_eq!(out.id, "chatcmpl-123");
        assert_eq!(out.model, "gpt-4o-2024-08-06");
        assert_eq!(out.status, ResponseStatus::Completed);
        assert_eq!(out.output().len(), 2);
        assert_eq!(out.output_text(), "Checking.");
        assert!(matches!(
            &out.output()[1],
            OutputItem::FunctionCall { call_id, name, .. } if call_id == "call_abc" && name == "lookup"
        ));
        assert_eq!(out.usage.total_tokens, 15);
        assert!(out.reasoning.is_none());
    }

    #[test]
    fn test_length_finish_is_incomplete() {
        let req = CanonicalRequest::new("gpt-4o", "hi");
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "x",
            "choices": [{"message": {"role": "assistant", "content": "trunc"}, "finish_reason": "length"}]
        }))
        .unwrap();

        let out = OpenAiTranslator::from_provider_response(resp, &req);
        assert_eq!(out.status, ResponseStatus::Incomplete);
        assert_eq!(
            out.incomplete_details.as_ref().map(|d| d.reason.as_str()),
            Some("max_output_tokens")
        );
        assert_eq!(out.model, "gpt-4o");
    }

    #[test]
    fn test_stream_frames() {
        let first = decode(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(
            first,
            vec![
                ChunkSignal::ResponseId("chatcmpl-1".to_string()),
                ChunkSignal::TextDelta("Hel".to_string())
            ]
        );

        let last = decode(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(last.last(), Some(&ChunkSignal::Completed));

        assert_eq!(decode("[DONE]").unwrap(), vec![ChunkSignal::Completed]);
        assert!(decode("not json").unwrap().is_empty());
    }

    #[test]
    fn test_stream_error_payload() {
        let err = decode(
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded","code":"rate_limit_exceeded"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.status, 429);
        assert_eq!(err.provider, "openai");
    }
}
