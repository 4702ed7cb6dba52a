//! Model client trait: the abstraction over the LLM backend.
//!
//! The runtime issues exactly one call shape: a Responses-style request with
//! the flattened history as `input` and the `open-agent` function forced as
//! the only tool. Implementations: OpenAI-compatible HTTP, scripted test
//! clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Name of the function tool the model must answer through.
pub const OPEN_AGENT_TOOL_NAME: &str = "open-agent";

/// A tool definition sent to the model so it knows the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Forces the model to answer through one named function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl ToolChoice {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            kind: "function".into(),
            name: name.into(),
        }
    }
}

/// One model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4.1")
    pub model: String,

    /// The flattened conversation
    pub input: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Forced tool selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Transport-level retries the client may perform
    #[serde(skip)]
    pub max_retries: u32,
}

impl ModelRequest {
    /// A plain-text request with no tools (used for summarization).
    pub fn text(model: impl Into<String>, input: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            input,
            tools: Vec::new(),
            tool_choice: None,
            max_retries: 0,
        }
    }

    /// Approximate wire size: model, input and tool choice, without the tool
    /// schema (which is constant across passes).
    pub fn estimated_payload_bytes(&self) -> usize {
        let shape = serde_json::json!({
            "model": self.model,
            "input": self.input,
            "tool_choice": self.tool_choice,
        });
        serde_json::to_vec(&shape).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A content part inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

/// One item of a response's `output` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutput {
    FunctionCall {
        name: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    #[serde(other)]
    Other,
}

/// The extracted `open-agent` function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: Option<String>,
    pub arguments: String,
}

/// A complete response from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub output: Vec<ResponseOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default)]
    pub model: String,
}

impl ModelResponse {
    /// A response carrying a single `open-agent` call with `arguments`.
    pub fn tool_call(arguments: impl Into<String>) -> Self {
        Self {
            output: vec![ResponseOutput::FunctionCall {
                name: OPEN_AGENT_TOOL_NAME.into(),
                call_id: Some(format!("call_{}", uuid::Uuid::new_v4().simple())),
                arguments: arguments.into(),
            }],
            ..Self::default()
        }
    }

    /// A plain-text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output_text: Some(text.into()),
            ..Self::default()
        }
    }

    /// The `open-agent` function call, if the model made one.
    pub fn open_agent_call(&self) -> Option<ToolCall> {
        self.output.iter().find_map(|item| match item {
            ResponseOutput::FunctionCall {
                name,
                call_id,
                arguments,
            } if name == OPEN_AGENT_TOOL_NAME => Some(ToolCall {
                name: name.clone(),
                call_id: call_id.clone(),
                arguments: arguments.trim().to_string(),
            }),
            _ => None,
        })
    }

    /// Best-effort text: tool-call arguments first, then `output_text`, then
    /// the first non-empty assistant `output_text` part.
    pub fn text_content(&self) -> String {
        if let Some(call) = self.open_agent_call()
            && !call.arguments.is_empty()
        {
            return call.arguments;
        }

        if let Some(text) = self.output_text.as_deref().map(str::trim)
            && !text.is_empty()
        {
            return text.to_string();
        }

        self.output
            .iter()
            .filter_map(|item| match item {
                ResponseOutput::Message { role, content } if role == "assistant" => Some(content),
                _ => None,
            })
            .flat_map(|parts| parts.iter())
            .find_map(|part| match part {
                OutputContent::OutputText { text } if !text.trim().is_empty() => {
                    Some(text.trim().to_string())
                }
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// The core model client trait.
///
/// The pass executor and the history compactor call `create_response()`
/// without knowing which backend answers. Cancellation is by drop: the
/// runtime races the returned future and drops it when ESC or a timeout wins.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn create_response(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_open_agent_arguments() {
        let response = ModelResponse::tool_call("  {\"message\":\"hi\",\"plan\":[]}  ");
        let call = response.open_agent_call().unwrap();
        assert_eq!(call.name, "open-agent");
        assert_eq!(call.arguments, "{\"message\":\"hi\",\"plan\":[]}");
        assert_eq!(response.text_content(), call.arguments);
    }

    #[test]
    fn ignores_other_function_calls() {
        let response = ModelResponse {
            output: vec![ResponseOutput::FunctionCall {
                name: "weather".into(),
                call_id: None,
                arguments: "{}".into(),
            }],
            ..ModelResponse::default()
        };
        assert!(response.open_agent_call().is_none());
    }

    #[test]
    fn text_falls_back_to_assistant_message_parts() {
        let response: ModelResponse = serde_json::from_value(serde_json::json!({
            "output": [
                { "type": "reasoning", "summary": [] },
                { "type": "message", "role": "assistant", "content": [
                    { "type": "refusal" },
                    { "type": "output_text", "text": "  summary text " }
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(response.text_content(), "summary text");
    }

    #[test]
    fn payload_estimate_grows_with_input() {
        let small = ModelRequest::text("m", vec![Message::user("a")]);
        let large = ModelRequest::text("m", vec![Message::user("a".repeat(500))]);
        assert!(large.estimated_payload_bytes() > small.estimated_payload_bytes() + 400);
    }
}
