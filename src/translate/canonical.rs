//! The canonical "Responses format" shared by every translator.
//!
//! Field names here are part of the public JSON contract (`max_output_tokens`,
//! `function_call`, `call_id`, `output_text`, ...) and must not be renamed.

use serde::{Deserialize, Serialize};

use super::errors::CanonicalError;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub input: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
    #[serde(default)]
    pub stream: bool,
}

impl CanonicalRequest {
    /// A minimal request: one model, one user prompt, everything else defaulted.
    pub fn new(model: impl Into<String>, input: impl Into<Input>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions: None,
            tools: Vec::new(),
            tool_choice: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            reasoning: None,
            structured_output: None,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Text(String),
    Items(Vec<InputItem>),
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Input {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<CanonicalTurn>> for Input {
    fn from(turns: Vec<CanonicalTurn>) -> Self {
        Self::Items(turns.into_iter().map(InputItem::Turn).collect())
    }
}

/// One element of `input`. Bare items are tried first because they carry a
/// `type` tag; anything else is read as a role-tagged turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Item(CanonicalItem),
    Turn(CanonicalTurn),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalItem {
    #[serde(rename = "message")]
    Message {
        role: Role,
        content: TurnContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTurn {
    pub role: Role,
    pub content: TurnContent,
    /// Set on `tool` turns; correlates to a prior `function_call` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl CanonicalTurn {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(text.into()),
            call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Blocks(vec![ContentBlock::FunctionCall {
                call_id: call_id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }]),
            call_id: None,
        }
    }

    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        let call_id = call_id.into();
        Self {
            role: Role::Tool,
            content: TurnContent::Blocks(vec![ContentBlock::FunctionCallOutput {
                call_id: call_id.clone(),
                output: output.into(),
            }]),
            call_id: Some(call_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text", alias = "input_text", alias = "output_text")]
    Text { text: String },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "parameters")]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Tool(ToolReference),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    Auto,
    Required,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReference {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Thinking budget used by providers that take a token count instead of a level.
    pub fn budget_tokens(self) -> u64 {
        match self {
            Self::Low => 1024,
            Self::Medium => 4096,
            Self::High => 16384,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReasoningSummary>,
}

/// JSON-Schema-backed output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: serde_json::Value,
    #[serde(default)]
    pub strict: bool,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteDetails {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "message")]
    Message {
        id: String,
        role: String,
        content: Vec<OutputContent>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
}

impl OutputItem {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message {
            id: new_id("msg"),
            role: "assistant".to_string(),
            content: vec![OutputContent::OutputText { text: text.into() }],
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::FunctionCall {
            id: new_id("fc"),
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "refusal")]
    Refusal { refusal: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Builds usage from provider counts; `total` falls back to input + output.
    pub fn from_counts(input_tokens: u64, output_tokens: u64, total: Option<u64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total
                .filter(|t| *t > 0)
                .unwrap_or(input_tokens + output_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseReasoning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A canonical response. `output_text` is derived from `output` and is only
/// ever written through [`CanonicalResponse::set_output`] / [`CanonicalResponse::push_output`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub status: ResponseStatus,
    pub model: String,
    output: Vec<OutputItem>,
    output_text: String,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ResponseReasoning>,
    pub error: Option<CanonicalError>,
}

impl CanonicalResponse {
    pub fn new(id: impl Into<String>, model: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            id: id.into(),
            object: "response",
            created_at: chrono::Utc::now().timestamp(),
            status,
            model: model.into(),
            output: Vec::new(),
            output_text: String::new(),
            usage: Usage::default(),
            incomplete_details: None,
            reasoning: None,
            error: None,
        }
    }

    /// The response shape of a failure: no output, `error` populated.
    pub fn failed(error: CanonicalError, model: impl Into<String>) -> Self {
        let mut response = Self::new(new_id("resp"), model, ResponseStatus::Failed);
        response.error = Some(error);
        response
    }

    pub fn output(&self) -> &[OutputItem] {
        &self.output
    }

    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn set_output(&mut self, output: Vec<OutputItem>) {
        self.output = output;
        self.output_text = collect_output_text(&self.output);
    }

    pub fn push_output(&mut self, item: OutputItem) {
        self.output.push(item);
        self.output_text = collect_output_text(&self.output);
    }

    pub fn into_output(self) -> Vec<OutputItem> {
        self.output
    }
}

/// Concatenation of every `output_text` block across `message` items, in order.
pub fn collect_output_text(output: &[OutputItem]) -> String {
    output
        .iter()
        .filter_map(|item| match item {
            OutputItem::Message { content, .. } => Some(content),
            OutputItem::FunctionCall { .. } => None,
        })
        .flatten()
        .filter_map(|block| match block {
            OutputContent::OutputText { text } => Some(text.as_str()),
            OutputContent::Refusal { .. } => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamEvent {
    Delta {
        response_id: String,
        message_id: String,
        text: String,
    },
    Done {
        response_id: String,
        status: ResponseStatus,
    },
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
        }
    }

    pub fn response_id(&self) -> &str {
        match self {
            Self::Delta { response_id, .. } | Self::Done { response_id, .. } => response_id,
        }
    }
}

/// `prefix_<32 hex chars>`
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_text_tracks_output() {
        let mut resp = CanonicalResponse::new("resp_1", "m", ResponseStatus::Completed);
        resp.push_output(OutputItem::message("Hello, "));
        resp.push_output(OutputItem::function_call("call_1", "lookup", "{}"));
        resp.push_output(OutputItem::message("world"));

        assert_eq!(resp.output_text(), "Hello, world");
        assert_eq!(resp.output_text(), collect_output_text(resp.output()));

        resp.set_output(Vec::new());
        assert_eq!(resp.output_text(), "");
    }

    #[test]
    fn test_input_accepts_mixed_items() {
        let input: Input = serde_json::from_value(serde_json::json!([
            {"role": "developer", "content": "be brief"},
            {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]},
            {"type": "function_call", "call_id": "call_1", "name": "f", "arguments": "{}"},
            {"type": "function_call_output", "call_id": "call_1", "output": "42"}
        ]))
        .unwrap();

        let Input::Items(items) = input else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(
            &items[0],
            InputItem::Turn(CanonicalTurn { role: Role::System, .. })
        ));
        assert!(matches!(
            &items[1],
            InputItem::Item(CanonicalItem::Message { role: Role::User, .. })
        ));
        assert!(matches!(
            &items[2],
            InputItem::Item(CanonicalItem::FunctionCall { .. })
        ));
        assert!(matches!(
            &items[3],
            InputItem::Item(CanonicalItem::FunctionCallOutput { .. })
        ));
    }

    #[test]
    fn test_response_json_field_names() {
        let mut resp = CanonicalResponse::new("resp_1", "m", ResponseStatus::Completed);
        resp.push_output(OutputItem::function_call("call_1", "f", "{\"a\":1}"));
        resp.usage = Usage::from_counts(3, 4, None);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["object"], "response");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["output"][0]["type"], "function_call");
        assert_eq!(json["output"][0]["call_id"], "call_1");
        assert_eq!(json["output"][0]["arguments"], "{\"a\":1}");
        assert_eq!(json["output_text"], "");
        assert_eq!(json["usage"]["total_tokens"], 7);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_stream_event_shape() {
        let event = StreamEvent::Delta {
            response_id: "resp_1".to_string(),
            message_id: "msg_1".to_string(),
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "delta");
        assert_eq!(json["message_id"], "msg_1");
        assert_eq!(event.event_name(), "delta");
    }
}
