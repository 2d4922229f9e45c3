//! Canonical requests ↔ Google `generateContent`.
//!
//! Roles are `user`/`model`, consecutive same-role turns are merged, and tool
//! results are `functionResponse` parts keyed by function name, resolved from
//! the call ids seen earlier in the conversation.

use serde_json::{Map, Value};

use super::canonical::{
    new_id, CanonicalRequest, CanonicalResponse, CanonicalTurn, ContentBlock, IncompleteDetails,
    OutputItem, ResponseStatus, Role, ToolChoice, ToolChoiceMode, TurnContent, Usage,
};
use super::errors::{normalize, CanonicalError, RawError};
use super::google_types::{
    Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, GoogleTool, Part,
    ThinkingConfig, ToolConfig,
};
use super::streaming::{ChunkSignal, StreamFrame};
use super::structured::strip_markdown_fence;
use super::tool_calls::CallNames;
use super::{arguments_to_object, call_id_or_new, normalize as input, plain_text, response_reasoning, Translator};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

const DEFAULT_MAX_TOKENS: u64 = 8192;

/// JSON-Schema keywords the Gemini schema dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$ref", "$schema", "additionalProperties", "$defs"];

pub struct GoogleTranslator;

impl Translator for GoogleTranslator {
    const PROVIDER: ProviderKind = ProviderKind::Google;

    type Request = GenerateContentRequest;
    type Response = GenerateContentResponse;
    type DecoderState = ();

    fn to_provider_request(req: &CanonicalRequest) -> Result<GenerateContentRequest> {
        let turns = input::turns(req)?;

        let system_text: Vec<String> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| plain_text(&t.content))
            .filter(|t| !t.is_empty())
            .collect();
        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system_text.join("\n\n"))],
        });

        let mut names = CallNames::new();
        let mut contents: Vec<Content> = Vec::new();
        for turn in turns.iter().filter(|t| t.role != Role::System) {
            let role = if turn.role == Role::Assistant { "model" } else { "user" };
            let parts = translate_turn(turn, &mut names)?;
            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(Content {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }

        let tools = (!req.tools.is_empty()).then(|| {
            vec![GoogleTool {
                function_declarations: req
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(sanitize_schema(&t.input_schema)),
                    })
                    .collect(),
            }]
        });

        let tool_config = req.tool_choice.as_ref().map(|choice| {
            let (mode, allowed) = match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => ("AUTO", None),
                ToolChoice::Mode(ToolChoiceMode::Required) => ("ANY", None),
                ToolChoice::Mode(ToolChoiceMode::None) => ("NONE", None),
                ToolChoice::Tool(reference) => ("ANY", Some(vec![reference.name.clone()])),
            };
            ToolConfig {
                function_calling_config: FunctionCallingConfig {
                    mode: mode.to_string(),
                    allowed_function_names: allowed,
                },
            }
        });

        let thinking_config = req.reasoning.as_ref().and_then(|r| r.effort).map(|effort| {
            ThinkingConfig {
                thinking_budget: effort.budget_tokens(),
                include_thoughts: true,
            }
        });

        let generation_config = GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            response_mime_type: req
                .structured_output
                .as_ref()
                .map(|_| "application/json".to_string()),
            response_schema: req
                .structured_output
                .as_ref()
                .map(|o| sanitize_schema(&o.schema)),
            thinking_config,
        };

        Ok(GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            tool_config,
            generation_config,
        })
    }

    fn from_provider_response(
        resp: GenerateContentResponse,
        original: &CanonicalRequest,
    ) -> CanonicalResponse {
        let structured = original.structured_output.is_some();

        let candidate = resp.candidates.into_iter().next();
        let (status, incomplete) =
            map_finish_reason(candidate.as_ref().and_then(|c| c.finish_reason.as_deref()));

        let id = resp.response_id.filter(|id| !id.is_empty()).unwrap_or_else(|| new_id("resp"));
        let model = resp
            .model_version
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| original.model.clone());

        let mut response = CanonicalResponse::new(id, model, status);
        response.incomplete_details = incomplete;

        let mut output = Vec::new();
        let mut text = String::new();
        let mut thoughts = String::new();
        let flush = |text: &mut String, output: &mut Vec<OutputItem>| {
            if text.is_empty() {
                return;
            }
            let body = std::mem::take(text);
            let body = if structured {
                strip_markdown_fence(&body).to_string()
            } else {
                body
            };
            output.push(OutputItem::message(body));
        };

        let parts = candidate.and_then(|c| c.content).map(|c| c.parts).unwrap_or_default();
        for part in parts {
            if part.is_thought() {
                thoughts.push_str(part.text.as_deref().unwrap_or_default());
                continue;
            }
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                flush(&mut text, &mut output);
                let arguments = serde_json::to_string(&call.args).unwrap_or_default();
                output.push(OutputItem::function_call(
                    call_id_or_new(call.id.as_deref()),
                    call.name,
                    arguments,
                ));
            }
        }
        flush(&mut text, &mut output);
        response.set_output(output);

        if let Some(usage) = resp.usage_metadata {
            response.usage = Usage::from_counts(
                usage.prompt_token_count,
                usage.candidates_token_count + usage.thoughts_token_count,
                Some(usage.total_token_count),
            );
        }
        response.reasoning = response_reasoning(original, Some(thoughts));
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

        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable Google chunk");
                return Ok(Vec::new());
            }
        };
        if value.get("error").is_some() {
            return Err(normalize(RawError::Payload(value), ProviderKind::Google));
        }
        let chunk: GenerateContentResponse = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized Google chunk");
                return Ok(Vec::new());
            }
        };

        let mut signals = Vec::new();
        if let Some(id) = chunk.response_id {
            signals.push(ChunkSignal::ResponseId(id));
        }
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if part.is_thought() {
                    continue;
                }
                if part.function_call.is_some() {
                    signals.push(ChunkSignal::MessageBoundary);
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    signals.push(ChunkSignal::TextDelta(text));
                }
            }
            if let Some(reason) = candidate.finish_reason {
                signals.push(ChunkSignal::Status(map_finish_reason(Some(&reason)).0));
                signals.push(ChunkSignal::Completed);
            }
        }
        Ok(signals)
    }
}

fn translate_turn(turn: &CanonicalTurn, names: &mut CallNames) -> Result<Vec<Part>> {
    let blocks = match &turn.content {
        TurnContent::Text(text) if turn.role == Role::Tool => {
            let call_id = turn.call_id.as_deref().unwrap_or_default();
            return Ok(vec![function_response(names, call_id, text)?]);
        }
        TurnContent::Text(text) if text.is_empty() => return Ok(Vec::new()),
        TurnContent::Text(text) => return Ok(vec![Part::text(text.clone())]),
        TurnContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    parts.push(Part::text(text.clone()));
                }
            }
            ContentBlock::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                names.record(call_id, name);
                parts.push(Part {
                    function_call: Some(FunctionCall {
                        id: None,
                        name: name.clone(),
                        args: arguments_to_object(arguments),
                    }),
                    ..Part::default()
                });
            }
            ContentBlock::FunctionCallOutput { call_id, output } => {
                parts.push(function_response(names, call_id, output)?);
            }
        }
    }
    Ok(parts)
}

fn function_response(names: &CallNames, call_id: &str, output: &str) -> Result<Part> {
    let name = names.resolve(call_id).ok_or_else(|| {
        BridgeError::translation(format!(
            "function_call_output '{call_id}' has no preceding function_call to take its name from"
        ))
    })?;
    // `response` must be a JSON object
    let response = match serde_json::from_str::<Value>(output) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "result": other }),
        Err(_) => serde_json::json!({ "result": output }),
    };
    Ok(Part {
        function_response: Some(FunctionResponse {
            name: name.to_string(),
            response,
        }),
        ..Part::default()
    })
}

/// Recursively drop schema keywords Google rejects. Property names under
/// `properties` are kept as-is; only their schemas are cleaned.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| {
                    let cleaned = match (key.as_str(), value) {
                        ("properties", Value::Object(props)) => Value::Object(
                            props
                                .iter()
                                .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                                .collect::<Map<_, _>>(),
                        ),
                        _ => sanitize_schema(value),
                    };
                    (key.clone(), cleaned)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn map_finish_reason(reason: Option<&str>) -> (ResponseStatus, Option<IncompleteDetails>) {
    let incomplete = |reason: &str| {
        (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: reason.to_string(),
            }),
        )
    };
    match reason {
        Some("MAX_TOKENS") => incomplete("max_output_tokens"),
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII") => {
            incomplete("content_filter")
        }
        _ => (ResponseStatus::Completed, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical::{ReasoningConfig, ReasoningEffort, StructuredOutput, ToolSpec};

    #[test]
    fn test_schema_keywords_stripped_recursively() {
        let schema = serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "$defs": {"Point": {"type": "object"}},
            "properties": {
                "additionalProperties": {"type": "string", "$ref": "#/$defs/x"},
                "items": {
                    "type": "array",
                    "items": {"type": "object", "additionalProperties": false, "properties": {}}
                }
            }
        });

        let cleaned = sanitize_schema(&schema);
        assert_eq!(
            cleaned,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "additionalProperties": {"type": "string"},
                    "items": {
                        "type": "array",
                        "items": {"type": "object", "properties": {}}
                    }
                }
            })
        );
    }

    #[test]
    fn test_function_response_takes_name_from_call() {
        let mut req = CanonicalRequest::new(
            "gemini-2.5-flash",
            vec![
                CanonicalTurn::user("weather?"),
                CanonicalTurn::function_call("call_1", "get_weather", "{\"city\":\"Oslo\"}"),
                CanonicalTurn::tool_output("call_1", "{\"sky\":\"rain\"}"),
                CanonicalTurn::tool_output("call_lost", "42"),
            ],
        );
        req.instructions = Some("Be brief.".to_string());

        let out = GoogleTranslator::to_provider_request(&req).unwrap();
        assert_eq!(
            out.system_instruction.as_ref().unwrap().parts[0].text.as_deref(),
            Some("Be brief.")
        );
        assert_eq!(out.contents.len(), 3);
        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
        assert_eq!(
            out.contents[1].parts[0].function_call.as_ref().unwrap().args["city"],
            "Oslo"
        );

        // Both results merge into one user turn
        let results = &out.contents[2].parts;
        assert_eq!(results.len(), 2);
        let first = results[0].function_response.as_ref().unwrap();
        assert_eq!(first.name, "get_weather");
        assert_eq!(first.response["sky"], "rain");
        let second = results[1].function_response.as_ref().unwrap();
        assert_eq!(second.name, "get_weather");
        assert_eq!(second.response, serde_json::json!({"result": 42}));
    }

    #[test]
    fn test_orphan_tool_output_is_rejected() {
        let req = CanonicalRequest::new(
            "gemini-2.5-flash",
            vec![CanonicalTurn::user("hi"), CanonicalTurn::tool_output("call_9", "x")],
        );
        assert!(matches!(
            GoogleTranslator::to_provider_request(&req),
            Err(BridgeError::Translation { .. })
        ));
    }

    #[test]
    fn test_generation_config() {
        let mut req = CanonicalRequest::new("gemini-2.5-pro", "2+2?");
        req.tools = vec![ToolSpec {
            name: "calc".to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object", "properties": {}, "additionalProperties": false}),
        }];
        req.tool_choice = Some(ToolChoice::Tool(crate::translate::canonical::ToolReference {
            name: "calc".to_string(),
        }));
        req.structured_output = Some(StructuredOutput {
            name: "answer".to_string(),
            description: None,
            schema: serde_json::json!({"type": "object", "properties": {"result": {"type": "number"}}, "additionalProperties": false}),
            strict: true,
        });
        req.reasoning = Some(ReasoningConfig {
            effort: Some(ReasoningEffort::Medium),
            summary: None,
        });

        let json = serde_json::to_value(GoogleTranslator::to_provider_request(&req).unwrap()).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert!(json["generationConfig"]["responseSchema"].get("additionalProperties").is_none());
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 4096);
        assert_eq!(json["generationConfig"]["thinkingConfig"]["includeThoughts"], true);
        assert_eq!(json["tools"][0]["functionDeclarations"][0]["name"], "calc");
        assert_eq!(json["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            json["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"][0],
            "calc"
        );
    }

    #[test]
    fn test_structured_reply_is_unfenced() {
        let mut req = CanonicalRequest::new("gemini-2.5-flash", "2+2?");
        req.structured_output = Some(StructuredOutput {
            name: "answer".to_string(),
            description: None,
            schema: serde_json::json!({"type": "object", "properties": {}}),
            strict: false,
        });
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "```json\n{\"result\":4}\n```"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12},
            "modelVersion": "gemini-2.5-flash-001"
        }))
        .unwrap();

        let out = GoogleTranslator::from_provider_response(resp, &req);
        assert_eq!(out.output_text(), "{\"result\":4}");
        assert_eq!(out.status, ResponseStatus::Completed);
        assert_eq!(out.model, "gemini-2.5-flash-001");
        assert_eq!(out.usage.total_tokens, 12);
    }

    #[test]
    fn test_thoughts_and_function_calls() {
        let req = CanonicalRequest::new("gemini-2.5-flash", "hi");
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "planning", "thought": true},
                    {"text": "Let me check."},
                    {"functionCall": {"name": "search", "args": {"q": "rust"}}}
                ]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 3, "thoughtsTokenCount": 4}
        }))
        .unwrap();

        let out = GoogleTranslator::from_provider_response(resp, &req);
        assert_eq!(out.output().len(), 2);
        assert_eq!(out.output_text(), "Let me check.");
        match &out.output()[1] {
            OutputItem::FunctionCall { call_id, arguments, .. } => {
                assert!(call_id.starts_with("call_"));
                assert_eq!(arguments, "{\"q\":\"rust\"}");
            }
            other => panic!("expected function call, got {other:?}"),
        }
        assert_eq!(out.status, ResponseStatus::Incomplete);
        assert_eq!(out.usage.output_tokens, 7);
        assert_eq!(out.usage.total_tokens, 9);
        assert_eq!(
            out.reasoning.as_ref().and_then(|r| r.summary.as_deref()),
            Some("planning")
        );
    }

    #[test]
    fn test_stream_chunks() {
        let decode =
            |data: &str| GoogleTranslator::decode_stream_frame(&StreamFrame::data(data), &mut ());

        let mid = decode(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}],"responseId":"g-1"}"#,
        )
        .unwrap();
        assert_eq!(
            mid,
            vec![
                ChunkSignal::ResponseId("g-1".to_string()),
                ChunkSignal::TextDelta("Hel".to_string())
            ]
        );

        let last = decode(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"lo"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(
            last,
            vec![
                ChunkSignal::TextDelta("lo".to_string()),
                ChunkSignal::Status(ResponseStatus::Completed),
                ChunkSignal::Completed
            ]
        );

        let err = decode(
            r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.status, 429);
    }
}
