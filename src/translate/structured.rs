//! Structured-output helpers shared by the translators.

use serde_json::Value;

use super::canonical::{StructuredOutput, ToolSpec};

const SYNTHETIC_TOOL_DESCRIPTION: &str =
    "Respond by calling this tool with arguments that match its input schema.";

/// The single required tool used to emulate structured output.
pub fn synthetic_tool(output: &StructuredOutput) -> ToolSpec {
    let mut schema = output.schema.clone();
    if let Some(obj) = schema.as_object_mut() {
        obj.entry("type").or_insert_with(|| Value::from("object"));
        obj.entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    ToolSpec {
        name: output.name.clone(),
        description: Some(
            output
                .description
                .clone()
                .unwrap_or_else(|| SYNTHETIC_TOOL_DESCRIPTION.to_string()),
        ),
        input_schema: schema,
    }
}

/// Serialize the synthetic call's argument object back into `output_text`.
pub fn unwrap_synthetic_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Remove a surrounding markdown code fence, if any.
///
/// Handles a language-tagged fence, an untagged fence, a missing newline
/// before the closing fence, and content glued to the tag (```` ```json{ ````).
pub fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);

    let body = match rest.split_once('\n') {
        Some((first_line, after)) if is_fence_tag(first_line.trim()) => after,
        _ => {
            let tag_len = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let after_tag = &rest[tag_len..];
            if tag_len > 0 && (after_tag.starts_with('{') || after_tag.starts_with('[')) {
                after_tag
            } else {
                rest
            }
        }
    };
    body.trim()
}

fn is_fence_tag(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_variants_strip_to_same_payload() {
        let expected = "{\"x\":1}";
        for input in [
            "```json\n{\"x\":1}\n```",
            "```{\"x\":1}```",
            "{\"x\":1}",
            "```json\n{\"x\":1}```",
            "```json{\"x\":1}```",
            "```\n{\"x\":1}\n```",
            "  ```JSON\n{\"x\":1}\n```  \n",
        ] {
            assert_eq!(strip_markdown_fence(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_multiline_body_kept() {
        let input = "```json\n{\n  \"a\": [1, 2]\n}\n```";
        assert_eq!(strip_markdown_fence(input), "{\n  \"a\": [1, 2]\n}");
    }

    #[test]
    fn test_unwrap_arguments() {
        let args = serde_json::json!({"result": 4});
        assert_eq!(unwrap_synthetic_arguments(&args), "{\"result\":4}");
        assert_eq!(
            unwrap_synthetic_arguments(&Value::from("{\"raw\":true}")),
            "{\"raw\":true}"
        );
    }

    #[test]
    fn test_synthetic_tool_shape() {
        let output = StructuredOutput {
            name: "math_answer".to_string(),
            description: None,
            schema: serde_json::json!({"properties": {"result": {"type": "number"}}}),
            strict: true,
        };
        let tool = synthetic_tool(&output);
        assert_eq!(tool.name, "math_answer");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_some());
    }
}
