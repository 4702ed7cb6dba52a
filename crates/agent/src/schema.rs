//! The `open-agent` response envelope: JSON Schema and tool descriptor.

use std::sync::LazyLock;

use openagent_core::model::{OPEN_AGENT_TOOL_NAME, ToolChoice, ToolDefinition};
use serde_json::{Value, json};

/// JSON Schema every assistant response must satisfy.
pub static RESPONSE_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "description": "Response envelope: a markdown message for the human and the full current plan.",
        "additionalProperties": false,
        "required": ["message", "plan"],
        "properties": {
            "message": {
                "type": "string",
                "description": "Markdown formatted message to the user."
            },
            "plan": {
                "type": "array",
                "description": "A DAG of steps. Re-send the whole plan every time; steps wait on each other through waitingForId.",
                "items": {
                    "type": "object",
                    "description": "A single plan step.",
                    "required": ["id", "title", "status"],
                    "additionalProperties": false,
                    "properties": {
                        "id": {
                            "type": "string",
                            "description": "Stable identifier chosen by the assistant."
                        },
                        "title": {
                            "type": "string",
                            "description": "Human readable summary of the step."
                        },
                        "status": {
                            "type": "string",
                            "enum": ["pending", "running", "completed", "failed", "abandoned"]
                        },
                        "priority": {
                            "type": ["number", "string", "null"],
                            "description": "Lower runs first."
                        },
                        "age": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Passes observed while the step has been running."
                        },
                        "waitingForId": {
                            "type": "array",
                            "description": "IDs that must complete before this step can run.",
                            "items": { "type": "string" }
                        },
                        "command": {
                            "type": ["object", "null"],
                            "description": "Command that completes this step. Required while the step is open. Use shell \"openagent\" to delegate to a sub-agent.",
                            "required": ["shell", "run"],
                            "additionalProperties": false,
                            "properties": {
                                "reason": { "type": "string" },
                                "shell": { "type": "string" },
                                "run": { "type": "string" },
                                "cwd": { "type": "string" },
                                "timeout_sec": { "type": "integer", "minimum": 1 },
                                "filter_regex": { "type": "string" },
                                "tail_lines": { "type": "integer", "minimum": 1 }
                            }
                        },
                        "observation": {
                            "type": ["object", "null"],
                            "description": "Latest observation recorded for this step."
                        }
                    }
                }
            }
        }
    })
});

/// The function tool the model must answer through.
pub fn response_tool() -> ToolDefinition {
    ToolDefinition {
        name: OPEN_AGENT_TOOL_NAME.into(),
        description: "Return the response envelope that matches the OpenAgent protocol (message and plan).".into(),
        parameters: RESPONSE_SCHEMA.clone(),
    }
}

/// Forces the model to call [`response_tool`].
pub fn response_tool_choice() -> ToolChoice {
    ToolChoice::function(OPEN_AGENT_TOOL_NAME)
}
