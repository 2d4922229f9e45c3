//! Canonical requests ↔ Ollama `/api/chat`.
//!
//! Ollama tool calls have object arguments and no ids, so ids are synthesized
//! on the way in; tool results are matched back by function name. There is no
//! tool-choice control: `required` and specific-tool choices fall back to the
//! model's default behaviour.

use super::canonical::{
    new_id, CanonicalRequest, CanonicalResponse, CanonicalTurn, ContentBlock, IncompleteDetails,
    OutputItem, ResponseStatus, Role, ToolChoice, ToolChoiceMode, TurnContent, Usage,
};
use super::errors::{normalize, CanonicalError, RawError};
use super::ollama_types::{
    ChatRequest, ChatResponse, Message, Options, Tool, ToolCall, ToolCallFunction, ToolFunction,
};
use super::streaming::{ChunkSignal, StreamFrame};
use super::structured::strip_markdown_fence;
use super::tool_calls::CallNames;
use super::{arguments_to_object, normalize as input, response_reasoning, Translator};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct OllamaTranslator;

impl Translator for OllamaTranslator {
    const PROVIDER: ProviderKind = ProviderKind::Ollama;

    type Request = ChatRequest;
    type Response = ChatResponse;
    type DecoderState = ();

    fn to_provider_request(req: &CanonicalRequest) -> Result<ChatRequest> {
        let turns = input::turns(req)?;

        let mut names = CallNames::new();
        let mut messages = Vec::new();
        for turn in &turns {
            messages.append(&mut translate_turn(turn, &mut names)?);
        }

        // `none` is honoured by withholding the tools entirely
        let withhold_tools = matches!(req.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::None)));
        match &req.tool_choice {
            Some(ToolChoice::Mode(ToolChoiceMode::Required)) => tracing::warn!(
                model = %req.model,
                "ollama has no tool_choice control; 'required' falls back to the model default"
            ),
            Some(ToolChoice::Tool(reference)) => tracing::warn!(
                model = %req.model,
                tool = %reference.name,
                "ollama has no tool_choice control; specific tool choice falls back to the model default"
            ),
            _ => {}
        }

        let tools = (!req.tools.is_empty() && !withhold_tools).then(|| {
            req.tools
                .iter()
                .map(|t| Tool {
                    tool_type: "function".to_string(),
                    function: ToolFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        });

        Ok(ChatRequest {
            model: req.model.clone(),
            messages,
            stream: req.stream,
            tools,
            format: req.structured_output.as_ref().map(|o| o.schema.clone()),
            think: req.reasoning.as_ref().map(|_| true),
            options: Options {
                num_predict: req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: req.temperature,
                top_p: req.top_p,
            },
        })
    }

    fn from_provider_response(resp: ChatResponse, original: &CanonicalRequest) -> CanonicalResponse {
        let (status, incomplete) = map_done_reason(resp.done_reason.as_deref());
        let model = if resp.model.is_empty() {
            original.model.clone()
        } else {
            resp.model
        };

        let mut response = CanonicalResponse::new(new_id("resp"), model, status);
        response.incomplete_details = incomplete;

        let message = resp.message.unwrap_or_default();
        let mut output = Vec::new();
        if !message.content.is_empty() {
            let text = if original.structured_output.is_some() {
                strip_markdown_fence(&message.content).to_string()
            } else {
                message.content
            };
            output.push(OutputItem::message(text));
        }
        for call in message.tool_calls.unwrap_or_default() {
            let arguments = serde_json::to_string(&call.function.arguments).unwrap_or_default();
            output.push(OutputItem::function_call(new_id("call"), call.function.name, arguments));
        }
        response.set_output(output);

        response.usage = Usage::from_counts(
            resp.prompt_eval_count.unwrap_or(0),
            resp.eval_count.unwrap_or(0),
            None,
        );
        response.reasoning = response_reasoning(original, message.thinking);
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

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable Ollama line");
                return Ok(Vec::new());
            }
        };
        if value.get("error").is_some() {
            return Err(normalize(RawError::Payload(value), ProviderKind::Ollama));
        }
        let line: ChatResponse = match serde_json::from_value(value) {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized Ollama line");
                return Ok(Vec::new());
            }
        };

        let mut signals = Vec::new();
        if let Some(message) = line.message {
            if message.tool_calls.as_ref().is_some_and(|c| !c.is_empty()) {
                signals.push(ChunkSignal::MessageBoundary);
            }
            if !message.content.is_empty() {
                signals.push(ChunkSignal::TextDelta(message.content));
            }
        }
        if line.done {
            signals.push(ChunkSignal::Status(map_done_reason(line.done_reason.as_deref()).0));
            signals.push(ChunkSignal::Completed);
        }
        Ok(signals)
    }
}

fn translate_turn(turn: &CanonicalTurn, names: &mut CallNames) -> Result<Vec<Message>> {
    let role = match turn.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let blocks = match &turn.content {
        TurnContent::Text(text) if turn.role == Role::Tool => {
            let call_id = turn.call_id.as_deref().unwrap_or_default();
            return Ok(vec![tool_result(names, call_id, text)?]);
        }
        TurnContent::Text(text) => return Ok(vec![Message::text(role, text.clone())]),
        TurnContent::Blocks(blocks) => blocks,
    };

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
            } => {
                names.record(call_id, name);
                tool_calls.push(ToolCall {
                    function: ToolCallFunction {
                        name: name.clone(),
                        arguments: arguments_to_object(arguments),
                    },
                });
            }
            ContentBlock::FunctionCallOutput { call_id, output } => {
                if !text.is_empty() {
                    messages.push(Message::text(role, std::mem::take(&mut text)));
                }
                messages.push(tool_result(names, call_id, output)?);
            }
        }
    }

    if !tool_calls.is_empty() {
        messages.push(Message {
            role: "assistant".to_string(),
            content: text,
            tool_calls: Some(tool_calls),
            ..Message::default()
        });
    } else if !text.is_empty() || messages.is_empty() {
        messages.push(Message::text(role, text));
    }
    Ok(messages)
}

fn tool_result(names: &CallNames, call_id: &str, output: &str) -> Result<Message> {
    let name = names.resolve(call_id).ok_or_else(|| {
        BridgeError::translation(format!(
            "function_call_output '{call_id}' has no preceding function_call to take its name from"
        ))
    })?;
    Ok(Message {
        role: "tool".to_string(),
        content: output.to_string(),
        tool_name: Some(name.to_string()),
        ..Message::default()
    })
}

fn map_done_reason(reason: Option<&str>) -> (ResponseStatus, Option<IncompleteDetails>) {
    match reason {
        Some("length") => (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: "max_output_tokens".to_string(),
            }),
        ),
        _ => (ResponseStatus::Completed, None),
    }
}
