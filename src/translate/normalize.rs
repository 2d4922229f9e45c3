//! Fold free-form input into the canonical turn sequence.
//!
//! Accepts a plain string, role-tagged turns, or bare `function_call` /
//! `function_call_output` items. Running it on its own output is a no-op.

use std::collections::HashSet;

use super::canonical::{
    CanonicalItem, CanonicalRequest, CanonicalTurn, ContentBlock, Input, InputItem, Role,
    ToolChoice, ToolSpec, TurnContent,
};
use crate::error::{BridgeError, Result};

/// Normalize `input` into turns, prepending `instructions` as a system turn
/// when no system turn is present yet.
pub fn normalize(input: &Input, instructions: Option<&str>) -> Result<Vec<CanonicalTurn>> {
    let mut turns = match input {
        Input::Text(text) => vec![CanonicalTurn::user(text.clone())],
        Input::Items(items) => items
            .iter()
            .map(fold_item)
            .collect::<Result<Vec<_>>>()?,
    };

    if let Some(instructions) = instructions {
        if !turns.iter().any(|t| t.role == Role::System) {
            turns.insert(0, CanonicalTurn::system(instructions));
        }
    }

    if turns.is_empty() {
        return Err(BridgeError::translation("input must contain at least one item"));
    }

    Ok(turns)
}

/// Normalize a whole request: tools validated, `input` folded into turns,
/// `instructions` consumed so no translator sees it twice.
pub fn normalize_request(mut request: CanonicalRequest) -> Result<CanonicalRequest> {
    validate_tools(&mut request)?;
    let turns = normalize(&request.input, request.instructions.as_deref())?;
    request.input = Input::from(turns);
    request.instructions = None;
    Ok(request)
}

/// The request's turns. Translators call this so they work on both raw and
/// already-normalized requests.
pub fn turns(request: &CanonicalRequest) -> Result<Vec<CanonicalTurn>> {
    normalize(&request.input, request.instructions.as_deref())
}

fn fold_item(item: &InputItem) -> Result<CanonicalTurn> {
    let turn = match item {
        InputItem::Turn(turn) => turn.clone(),
        InputItem::Item(CanonicalItem::Message {
            role,
            content,
            call_id,
        }) => CanonicalTurn {
            role: *role,
            content: content.clone(),
            call_id: call_id.clone(),
        },
        InputItem::Item(CanonicalItem::FunctionCall {
            call_id,
            name,
            arguments,
        }) => CanonicalTurn::function_call(call_id, name, arguments),
        InputItem::Item(CanonicalItem::FunctionCallOutput { call_id, output }) => {
            CanonicalTurn::tool_output(call_id, output)
        }
    };
    ensure_tool_call_id(turn)
}

fn ensure_tool_call_id(mut turn: CanonicalTurn) -> Result<CanonicalTurn> {
    if turn.role != Role::Tool || turn.call_id.is_some() {
        return Ok(turn);
    }
    if let TurnContent::Blocks(blocks) = &turn.content {
        turn.call_id = blocks.iter().find_map(|b| match b {
            ContentBlock::FunctionCallOutput { call_id, .. } => Some(call_id.clone()),
            _ => None,
        });
    }
    if turn.call_id.is_none() {
        return Err(BridgeError::translation(
            "tool turns must carry a call_id matching an earlier function_call",
        ));
    }
    Ok(turn)
}

/// Reject duplicate or malformed tools; fill in `type`/`properties` when omitted.
pub fn validate_tools(request: &mut CanonicalRequest) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in &mut request.tools {
        if tool.name.trim().is_empty() {
            return Err(BridgeError::translation("tool names must not be empty"));
        }
        if !seen.insert(tool.name.clone()) {
            return Err(BridgeError::translation(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
        normalize_object_schema(tool)?;
    }

    if let Some(ToolChoice::Tool(reference)) = &request.tool_choice {
        if !seen.contains(&reference.name) {
            return Err(BridgeError::translation(format!(
                "tool_choice names '{}' which is not among the request's tools",
                reference.name
            )));
        }
    }

    if let Some(output) = &request.structured_output {
        if !output.schema.is_object() {
            return Err(BridgeError::translation(format!(
                "structured_output schema '{}' must be a JSON object",
                output.name
            )));
        }
        if seen.contains(&output.name) {
            return Err(BridgeError::translation(format!(
                "structured_output name '{}' collides with a tool of the same name",
                output.name
            )));
        }
    }

    Ok(())
}

fn normalize_object_schema(tool: &mut ToolSpec) -> Result<()> {
    let name = tool.name.clone();
    let schema = tool.input_schema.as_object_mut().ok_or_else(|| {
        BridgeError::translation(format!("tool '{name}': input_schema must be a JSON object"))
    })?;

    match schema.get("type") {
        None => {
            schema.insert("type".to_string(), serde_json::json!("object"));
        }
        Some(serde_json::Value::String(t)) if t == "object" => {}
        Some(other) => {
            return Err(BridgeError::translation(format!(
                "tool '{name}': input_schema type must be \"object\", got {other}"
            )));
        }
    }

    match schema.get("properties") {
        None => {
            schema.insert("properties".to_string(), serde_json::json!({}));
        }
        Some(props) if props.is_object() => {}
        Some(_) => {
            return Err(BridgeError::translation(format!(
                "tool '{name}': properties must be an object"
            )));
        }
    }

    Ok(())
}
