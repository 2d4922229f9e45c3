//! Canonical requests ↔ Anthropic Messages.
//!
//! Anthropic requires strict user/assistant alternation, so consecutive turns
//! with the same role are merged after role mapping. It has no structured
//! output mode; a JSON-Schema contract is emulated with a single forced tool
//! whose arguments are unwrapped back into `output_text` on the way out.

use super::anthropic_types::{
    ContentBlock, Delta, Message, MessagesRequest, MessagesResponse, ResponseContentBlock, Role,
    StreamEvent, ThinkingConfig, Tool, ToolChoice as AnthropicToolChoice,
};
use super::canonical::{
    new_id, CanonicalRequest, CanonicalResponse, CanonicalTurn, ContentBlock as CanonicalBlock,
    IncompleteDetails, OutputItem, ResponseStatus, Role as CanonicalRole, ToolChoice,
    ToolChoiceMode, TurnContent, Usage,
};
use super::errors::{normalize, CanonicalError, RawError};
use super::streaming::{ChunkSignal, StreamFrame};
use super::structured::{synthetic_tool, unwrap_synthetic_arguments};
use super::{arguments_to_object, call_id_or_new, normalize as input, plain_text, response_reasoning, Translator};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Hard output-token caps by model prefix. Longer prefixes come first.
const MODEL_TOKEN_CAPS: &[(&str, u64)] = &[
    ("claude-opus-4-5", 64_000),
    ("claude-opus-4", 32_000),
    ("claude-sonnet-4", 64_000),
    ("claude-haiku-4", 64_000),
    ("claude-3-7-sonnet", 64_000),
    ("claude-3-5-sonnet", 8_192),
    ("claude-3-5-haiku", 8_192),
    ("claude-3-opus", 4_096),
    ("claude-3-sonnet", 4_096),
    ("claude-3-haiku", 4_096),
];

const CONTINUE_PROMPT: &str = "Continue.";

/// Smallest thinking budget Anthropic accepts.
const MIN_THINKING_BUDGET: u64 = 1024;

pub struct AnthropicTranslator;

/// Stream decoder state: while the forced structured-output tool is open, its
/// argument fragments are the response text.
#[derive(Debug, Default)]
pub struct AnthropicDecoderState {
    synthetic_tool: Option<String>,
    synthetic_block: Option<usize>,
}

impl Translator for AnthropicTranslator {
    const PROVIDER: ProviderKind = ProviderKind::Anthropic;

    type Request = MessagesRequest;
    type Response = MessagesResponse;
    type DecoderState = AnthropicDecoderState;

    fn to_provider_request(req: &CanonicalRequest) -> Result<MessagesRequest> {
        let max_tokens = max_tokens_for(&req.model, req.max_output_tokens)?;
        let turns = input::turns(req)?;

        let system_parts: Vec<String> = turns
            .iter()
            .filter(|t| t.role == CanonicalRole::System)
            .map(|t| plain_text(&t.content))
            .filter(|t| !t.is_empty())
            .collect();
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

        let mut messages: Vec<Message> = Vec::new();
        for turn in turns.iter().filter(|t| t.role != CanonicalRole::System) {
            let (role, content) = translate_turn(turn);
            if content.is_empty() {
                continue;
            }
            push_merged(&mut messages, role, content);
        }

        let mut tools: Vec<Tool> = req
            .tools
            .iter()
            .map(|t| Tool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        let mut tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

        if let Some(output) = &req.structured_output {
            let tool = synthetic_tool(output);
            tools.push(Tool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            });
            tool_choice = Some(AnthropicToolChoice::Tool {
                name: output.name.clone(),
            });
            // A forced tool choice cannot follow a trailing assistant turn
            if messages.last().map_or(true, |m| m.role == Role::Assistant) {
                push_merged(
                    &mut messages,
                    Role::User,
                    vec![ContentBlock::Text {
                        text: CONTINUE_PROMPT.to_string(),
                    }],
                );
            }
        }

        let forced = matches!(
            tool_choice,
            Some(AnthropicToolChoice::Any | AnthropicToolChoice::Tool { .. })
        );
        let thinking = req
            .reasoning
            .as_ref()
            .and_then(|r| r.effort)
            .filter(|_| !forced)
            .and_then(|effort| {
                let budget = effort.budget_tokens().min(max_tokens.saturating_sub(1));
                (budget >= MIN_THINKING_BUDGET).then(|| ThinkingConfig {
                    thinking_type: "enabled".to_string(),
                    budget_tokens: budget,
                })
            });
        if req.reasoning.is_some() && forced {
            tracing::debug!(model = %req.model, "dropping thinking: tool choice is forced");
        }

        // Anthropic rejects sampling overrides alongside extended thinking
        let (temperature, top_p) = if thinking.is_some() {
            (None, None)
        } else {
            (req.temperature, req.top_p)
        };

        Ok(MessagesRequest {
            model: req.model.clone(),
            max_tokens,
            messages,
            system,
            stream: req.stream.then_some(true),
            temperature,
            top_p,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
            thinking,
        })
    }

    fn from_provider_response(
        resp: MessagesResponse,
        original: &CanonicalRequest,
    ) -> CanonicalResponse {
        let synthetic = original.structured_output.as_ref().map(|o| o.name.as_str());

        let (status, incomplete) = map_stop_reason(resp.stop_reason.as_deref());
        let id = if resp.id.is_empty() {
            new_id("resp")
        } else {
            resp.id
        };
        let model = if resp.model.is_empty() {
            original.model.clone()
        } else {
            resp.model
        };

        let mut response = CanonicalResponse::new(id, model, status);
        response.incomplete_details = incomplete;

        let mut output = Vec::new();
        let mut synthetic_payload = None;
        let mut thinking = String::new();
        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text.is_empty() {
                        output.push(OutputItem::message(text));
                    }
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    if Some(name.as_str()) == synthetic {
                        synthetic_payload = Some(unwrap_synthetic_arguments(&input));
                    } else {
                        let arguments = serde_json::to_string(&input).unwrap_or_default();
                        output.push(OutputItem::function_call(
                            call_id_or_new(Some(&id)),
                            name,
                            arguments,
                        ));
                    }
                }
                ResponseContentBlock::Thinking { thinking: t, .. } => thinking.push_str(&t),
                ResponseContentBlock::Other => {}
            }
        }

        // The synthetic call's payload is the answer; any preamble text is dropped.
        match synthetic_payload {
            Some(payload) => response.set_output(vec![OutputItem::message(payload)]),
            None => response.set_output(output),
        }

        response.usage = Usage::from_counts(resp.usage.input_tokens, resp.usage.output_tokens, None);
        response.reasoning = response_reasoning(original, Some(thinking));
        response
    }

    fn decoder_state(request: &CanonicalRequest) -> AnthropicDecoderState {
        AnthropicDecoderState {
            synthetic_tool: request.structured_output.as_ref().map(|o| o.name.clone()),
            synthetic_block: None,
        }
    }

    fn decode_stream_frame(
        frame: &StreamFrame,
        state: &mut AnthropicDecoderState,
    ) -> std::result::Result<Vec<ChunkSignal>, CanonicalError> {
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable Anthropic event");
                return Ok(Vec::new());
            }
        };
        let event: StreamEvent = match serde_json::from_value(value.clone()) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized Anthropic event");
                return Ok(Vec::new());
            }
        };

        let signals = match event {
            StreamEvent::MessageStart { message } => vec![ChunkSignal::ResponseId(message.id)],
            StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { name, .. },
            } => {
                if state.synthetic_tool.as_deref() == Some(name.as_str()) {
                    state.synthetic_block = Some(index);
                    Vec::new()
                } else {
                    vec![ChunkSignal::MessageBoundary]
                }
            }
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
                ..
            } => vec![ChunkSignal::TextDelta(text)],
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json },
            } if state.synthetic_block == Some(index) => {
                vec![ChunkSignal::TextDelta(partial_json)]
            }
            StreamEvent::ContentBlockStop { index } => {
                if state.synthetic_block == Some(index) {
                    state.synthetic_block = None;
                }
                Vec::new()
            }
            StreamEvent::MessageDelta { delta, .. } => match delta.stop_reason {
                Some(reason) => vec![ChunkSignal::Status(map_stop_reason(Some(&reason)).0)],
                None => Vec::new(),
            },
            StreamEvent::MessageStop => vec![ChunkSignal::Completed],
            StreamEvent::Error { .. } => {
                return Err(normalize(RawError::Payload(value), ProviderKind::Anthropic));
            }
            _ => Vec::new(),
        };
        Ok(signals)
    }
}

/// Output-token ceiling for `model`: the caller's value clamped to the model's
/// hard cap. Unknown models need an explicit value.
pub fn max_tokens_for(model: &str, requested: Option<u64>) -> Result<u64> {
    let cap = MODEL_TOKEN_CAPS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, cap)| *cap);

    match (cap, requested) {
        (Some(cap), Some(requested)) => Ok(requested.min(cap)),
        (Some(cap), None) => Ok(cap),
        (None, Some(requested)) => Ok(requested),
        (None, None) => Err(BridgeError::config(format!(
            "unknown Anthropic model '{model}': set max_output_tokens explicitly"
        ))),
    }
}

fn translate_turn(turn: &CanonicalTurn) -> (Role, Vec<ContentBlock>) {
    let role = match turn.role {
        CanonicalRole::Assistant => Role::Assistant,
        CanonicalRole::User | CanonicalRole::Tool | CanonicalRole::System => Role::User,
    };

    let content = match &turn.content {
        TurnContent::Text(text) if turn.role == CanonicalRole::Tool => {
            vec![ContentBlock::ToolResult {
                tool_use_id: turn.call_id.clone().unwrap_or_default(),
                content: text.clone(),
            }]
        }
        TurnContent::Text(text) if text.is_empty() => Vec::new(),
        TurnContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        TurnContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                CanonicalBlock::Text { text } if text.is_empty() => None,
                CanonicalBlock::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
                CanonicalBlock::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => Some(ContentBlock::ToolUse {
                    id: call_id.clone(),
                    name: name.clone(),
                    input: arguments_to_object(arguments),
                }),
                CanonicalBlock::FunctionCallOutput { call_id, output } => {
                    Some(ContentBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: output.clone(),
                    })
                }
            })
            .collect(),
    };

    (role, content)
}

/// Append `content` to the last message if it has the same role.
fn push_merged(messages: &mut Vec<Message>, role: Role, mut content: Vec<ContentBlock>) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.append(&mut content),
        _ => messages.push(Message { role, content }),
    }
}

fn translate_tool_choice(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => AnthropicToolChoice::Auto,
        ToolChoice::Mode(ToolChoiceMode::Required) => AnthropicToolChoice::Any,
        ToolChoice::Mode(ToolChoiceMode::None) => AnthropicToolChoice::None,
        ToolChoice::Tool(reference) => AnthropicToolChoice::Tool {
            name: reference.name.clone(),
        },
    }
}

fn map_stop_reason(reason: Option<&str>) -> (ResponseStatus, Option<IncompleteDetails>) {
    match reason {
        Some("max_tokens") => (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: "max_output_tokens".to_string(),
            }),
        ),
        Some("refusal") => (
            ResponseStatus::Incomplete,
            Some(IncompleteDetails {
                reason: "content_filter".to_string(),
            }),
        ),
        _ => (ResponseStatus::Completed, None),
    }
}
