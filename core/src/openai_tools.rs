use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResponsesApiTool {
    name: &'static str,
    description: &'static str,
    strict: bool,
    parameters: JsonSchema,
}

/// When serialized as JSON, this produces a valid "Tool" in the OpenAI
/// Responses API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub(crate) enum OpenAiTool {
    #[serde(rename = "function")]
    Function(ResponsesApiTool),
}

/// Generic JSON‑Schema subset needed for our tool definitions
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonSchema {
    String,
    Number,
    Array {
        items: Box<JsonSchema>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        required: &'static [&'static str],
        #[serde(rename = "additionalProperties")]
        additional_properties: bool,
    },
}

/// Tool usage specification
static DEFAULT_TOOLS: LazyLock<Vec<OpenAiTool>> = LazyLock::new(|| {
    let mut properties = BTreeMap::new();
    properties.insert(
        "command".to_string(),
        JsonSchema::Array {
            items: Box::new(JsonSchema::String),
        },
    );
    properties.insert("workdir".to_string(), JsonSchema::String);
    properties.insert("timeout".to_string(), JsonSchema::Number);

    vec![OpenAiTool::Function(ResponsesApiTool {
        name: "shell",
        description: "Runs a shell command, and returns its output.",
        strict: false,
        parameters: JsonSchema::Object {
            properties,
            required: &["command"],
            additional_properties: false,
        },
    })]
});

/// Returns JSON values that are compatible with Function Calling in the
/// Responses API:
/// https://platform.openai.com/docs/guides/function-calling?api-mode=responses
pub(crate) fn create_tools_json_for_responses_api() -> crate::error::Result<Vec<serde_json::Value>>
{
    let mut tools_json = Vec::with_capacity(DEFAULT_TOOLS.len());
    for t in DEFAULT_TOOLS.iter() {
        tools_json.push(serde_json::to_value(t)?);
    }

    tracing::trace!("tools_json: {}", serde_json::to_string_pretty(&tools_json)?);
    Ok(tools_json)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn shell_tool_schema() {
        let tools = create_tools_json_for_responses_api().unwrap();
        assert_eq!(
            tools,
            vec![json!({
                "type": "function",
                "name": "shell",
                "description": "Runs a shell command, and returns its output.",
                "strict": false,
                "parameters": {
                    "type": "object",
                    "properties": {
                        "command": { "type": "array", "items": { "type": "string" } },
                        "timeout": { "type": "number" },
                        "workdir": { "type": "string" }
                    },
                    "required": ["command"],
                    "additionalProperties": false
                }
            })]
        );
    }
}
