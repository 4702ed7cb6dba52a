//! OpenAI-compatible Responses API client.
//!
//! Works with OpenAI and any endpoint exposing `POST {base}/responses`.
//!
//! Supports:
//! - Function tools with a forced `tool_choice`
//! - Transport-level retries for rate limits and network failures

use std::time::Duration;

use async_trait::async_trait;
use openagent_config::AppConfig;
use openagent_core::error::ProviderError;
use openagent_core::model::{ModelClient, ModelRequest, ModelResponse, ToolDefinition};
use serde::Serialize;
use tracing::{debug, warn};

/// Base delay between retries; doubled on every attempt.
const RETRY_BASE_DELAY_MS: u64 = 500;

/// An OpenAI-compatible Responses API client.
pub struct OpenAiResponsesClient {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiResponsesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiResponsesClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiResponsesClient {
    /// Create a new client. `timeout` bounds a single HTTP exchange.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI client (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            Duration::from_secs(120),
        )
    }

    /// Build from the application config. Fails without an API key.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::NotConfigured(
                    "No API key. Set OPENAI_API_KEY or api_key in config.toml".into(),
                )
            })?;

        // The gateway enforces the per-request deadline; this is only a backstop.
        let timeout = config
            .request_timeout_ms
            .map(|ms| Duration::from_millis(ms.saturating_mul(2)))
            .unwrap_or(Duration::from_secs(600));

        Self::new("openai", &config.base_url, api_key, timeout)
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool<'_>> {
        tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function",
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            })
            .collect()
    }

    fn request_body(request: &ModelRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "input": request.input,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = serde_json::json!(choice);
        }

        body
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/responses", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ModelNotFound(error_body));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

fn retry_delay(error: &ProviderError, attempt: u32) -> Duration {
    match error {
        ProviderError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
        _ => Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(1 << attempt.min(6))),
    }
}

#[async_trait]
impl ModelClient for OpenAiResponsesClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_response(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.input.len(),
            "Sending responses request"
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < request.max_retries => {
                    let delay = retry_delay(&e, attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Retrying model request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// --- Responses API types ---

#[derive(Serialize)]
struct ApiTool<'a> {
    r#type: &'static str,
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_core::message::Message;
    use openagent_core::model::{ResponseOutput, ToolChoice};

    #[test]
    fn openai_constructor() {
        let client = OpenAiResponsesClient::openai("sk-test").unwrap();
        assert_eq!(client.name(), "openai");
        assert_eq!(client.base_url, "https://api.openai.com/v1");
        assert!(!format!("{client:?}").contains("sk-test"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client =
            OpenAiResponsesClient::new("x", "http://localhost:8080/v1/", "k", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn from_config_requires_key() {
        let config = AppConfig::default();
        assert!(matches!(
            OpenAiResponsesClient::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        assert!(OpenAiResponsesClient::from_config(&config).is_ok());
    }

    #[test]
    fn body_includes_tools_and_choice() {
        let request = ModelRequest {
            model: "gpt-5-codex".into(),
            input: vec![Message::system("sys"), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "open-agent".into(),
                description: "respond".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: Some(ToolChoice::function("open-agent")),
            max_retries: 0,
        };

        let body = OpenAiResponsesClient::request_body(&request);
        assert_eq!(body["model"], "gpt-5-codex");
        assert_eq!(body["input"][1]["role"], "user");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["name"], "open-agent");
        assert_eq!(body["tool_choice"]["type"], "function");
        assert_eq!(body["tool_choice"]["name"], "open-agent");
    }

    #[test]
    fn text_body_has_no_tools() {
        let request = ModelRequest::text("gpt-4.1", vec![Message::user("summarize")]);
        let body = OpenAiResponsesClient::request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn parse_function_call_response() {
        let raw = serde_json::json!({
            "model": "gpt-5-codex",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "function_call", "name": "open-agent", "call_id": "c1",
                 "arguments": "{\"message\":\"hi\",\"plan\":[]}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5, "total_tokens": 15}
        });
        let response: ModelResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(response.output[0], ResponseOutput::Other));
        let call = response.open_agent_call().unwrap();
        assert_eq!(call.call_id.as_deref(), Some("c1"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn retry_delays() {
        let rate = ProviderError::RateLimited {
            retry_after_secs: 3,
        };
        assert_eq!(retry_delay(&rate, 0), Duration::from_secs(3));
        let net = ProviderError::Network("reset".into());
        assert_eq!(retry_delay(&net, 0), Duration::from_millis(500));
        assert_eq!(retry_delay(&net, 2), Duration::from_millis(2000));
    }
}
