//! A model client that replays a scripted sequence of replies.
//!
//! Each call to `create_response` consumes the next reply in the queue and
//! records the request it was given. Used by tests across the workspace and
//! for deterministic offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use openagent_core::error::ProviderError;
use openagent_core::model::{ModelClient, ModelRequest, ModelResponse};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond immediately
    Respond(ModelResponse),
    /// Respond after a delay
    Delayed(Duration, ModelResponse),
    /// Fail with a provider error
    Fail(ProviderError),
    /// Never settle
    Hang,
}

/// Sequential scripted client.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies that each carry one `open-agent` call with the given JSON.
    pub fn tool_calls(arguments: Vec<serde_json::Value>) -> Self {
        Self::new(
            arguments
                .into_iter()
                .map(|args| ScriptedReply::Respond(ModelResponse::tool_call(args.to_string())))
                .collect(),
        )
    }

    /// Plain-text replies (used for summarization).
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| ScriptedReply::Respond(ModelResponse::text(*t)))
                .collect(),
        )
    }

    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Copies of every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_response(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: "Scripted client has no more replies".into(),
            }),
        }
    }
}
