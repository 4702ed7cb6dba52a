//! Cancellation-aware model invocation.
//!
//! One call is `idle → in-flight → {success, canceled, aborted}`. The request
//! future is raced against the session's ESC waiter, the cancellation
//! registry and an optional wall-clock deadline; the first branch to settle
//! wins and the losers are dropped, which cancels the in-flight HTTP call.
//!
//! Cleanup (unregister, stop "thinking", clear the stream debug panel) lives
//! in a drop guard so it runs on every exit path, including `?` and panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use openagent_core::error::ProviderError;
use openagent_core::event::{EventBus, RuntimeEvent, StatusLevel, ThinkingState};
use openagent_core::history::HistoryEntry;
use openagent_core::model::{ModelClient, ModelRequest, ModelResponse};
use serde_json::{Map, Value, json};

use crate::cancellation::{CancellationRegistration, CancellationRegistry};
use crate::esc::EscState;
use crate::history::HistoryStore;
use crate::observation::ObservationBuilder;
use crate::schema::{response_tool, response_tool_choice};

static STREAM_DEBUG_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Why a request did not produce a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The human pressed ESC
    EscapeKey,
    /// Timeout, registry cancel, or an abort-shaped transport error
    Abort,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::EscapeKey => "escape_key",
            CancelReason::Abort => "abort",
        }
    }
}

/// Tagged result of one model call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Success(ModelResponse),
    Canceled(CancelReason),
}

/// Per-process request settings.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub model: String,
    /// Applied to each request, not each pass
    pub timeout: Option<Duration>,
    pub max_retries: u32,
}

impl RequestSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            timeout: None,
            max_retries: 0,
        }
    }

    pub fn from_config(config: &openagent_config::AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            timeout: config.request_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
            max_retries: config.max_retries,
        }
    }
}

/// The request shape every pass sends: the flattened history with the
/// `open-agent` tool forced.
pub fn build_model_request(model: &str, history: &HistoryStore, max_retries: u32) -> ModelRequest {
    ModelRequest {
        model: model.to_string(),
        input: history.to_messages(),
        tools: vec![response_tool()],
        tool_choice: Some(response_tool_choice()),
        max_retries,
    }
}

enum Race {
    Completed(Result<ModelResponse, ProviderError>),
    Escape(Option<Value>),
    Aborted,
}

struct RequestCleanup {
    events: EventBus,
    debug_id: String,
    _registration: CancellationRegistration,
}

impl RequestCleanup {
    fn stream_event(&self, action: &str, value: Option<Value>) -> RuntimeEvent {
        RuntimeEvent::Debug {
            id: self.debug_id.clone(),
            payload: json!({
                "stage": "structured-stream",
                "action": action,
                "value": value,
            }),
        }
    }
}

impl Drop for RequestCleanup {
    fn drop(&mut self) {
        self.events.publish(RuntimeEvent::Thinking {
            state: ThinkingState::Stop,
        });
        self.events.publish(self.stream_event("remove", None));
    }
}

/// Issues model requests on behalf of the pass executor.
#[derive(Clone)]
pub struct ModelRequestGateway {
    client: Arc<dyn ModelClient>,
    events: EventBus,
    observations: ObservationBuilder,
    registry: CancellationRegistry,
    settings: RequestSettings,
}

impl std::fmt::Debug for ModelRequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRequestGateway")
            .field("client", &self.client.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ModelRequestGateway {
    pub fn new(client: Arc<dyn ModelClient>, events: EventBus, settings: RequestSettings) -> Self {
        Self {
            client,
            events,
            observations: ObservationBuilder::new(),
            registry: CancellationRegistry::new(),
            settings,
        }
    }

    pub fn with_registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_observation_builder(mut self, builder: ObservationBuilder) -> Self {
        self.observations = builder;
        self
    }

    pub fn settings(&self) -> &RequestSettings {
        &self.settings
    }

    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// The request this gateway would send for `history`.
    pub fn build_request(&self, history: &HistoryStore) -> ModelRequest {
        build_model_request(&self.settings.model, history, self.settings.max_retries)
    }

    /// Send one completion request for `history`.
    ///
    /// On cancellation a cancellation observation tagged with `pass` is
    /// appended to `history` and `Canceled` is returned. Errors that are not
    /// abort-shaped propagate.
    pub async fn request_completion(
        &self,
        history: &mut HistoryStore,
        esc: Option<&EscState>,
        pass: u32,
    ) -> Result<ModelOutcome, ProviderError> {
        let waiter = match esc {
            Some(state) => {
                let waiter = state.arm();
                if waiter.is_none() {
                    tracing::warn!(pass, "ESC state already armed; request will not observe ESC");
                }
                waiter
            }
            None => None,
        };

        self.events.publish(RuntimeEvent::Thinking {
            state: ThinkingState::Start,
        });

        let registration = self.registry.register("ai-sdk.generate");
        let cancel_token = registration.token().clone();
        let cleanup = RequestCleanup {
            events: self.events.clone(),
            debug_id: format!(
                "structured-response-stream-{}",
                STREAM_DEBUG_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
            ),
            _registration: registration,
        };

        let request = self.build_request(history);
        tracing::debug!(
            pass,
            model = %request.model,
            messages = request.input.len(),
            "Sending model request"
        );

        let esc_wait = async {
            match &waiter {
                Some(waiter) => waiter.wait().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match self.settings.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let race = tokio::select! {
            biased;
            payload = esc_wait => Race::Escape(payload),
            result = self.client.create_response(request) => Race::Completed(result),
            _ = cancel_token.cancelled() => Race::Aborted,
            _ = deadline => Race::Aborted,
        };
        drop(waiter);

        let outcome = match race {
            Race::Completed(Ok(response)) => {
                if let Some(state) = esc {
                    state.reset();
                }
                if let Some(call) = response.open_agent_call()
                    && let Ok(value) = serde_json::from_str::<Value>(&call.arguments)
                {
                    self.events.publish(cleanup.stream_event("replace", Some(value)));
                }
                ModelOutcome::Success(response)
            }
            Race::Escape(payload) => {
                let mut extra = Map::new();
                extra.insert("esc_payload".into(), payload.unwrap_or(Value::Null));
                self.cancel(history, esc, pass, CancelReason::EscapeKey, extra)
            }
            Race::Completed(Err(error)) if error.is_abort_like() => {
                tracing::debug!(pass, %error, "Model request aborted");
                self.cancel(history, esc, pass, CancelReason::Abort, Map::new())
            }
            Race::Aborted => self.cancel(history, esc, pass, CancelReason::Abort, Map::new()),
            Race::Completed(Err(error)) => {
                if let Some(state) = esc {
                    state.reset();
                }
                return Err(error);
            }
        };

        drop(cleanup);
        Ok(outcome)
    }

    fn cancel(
        &self,
        history: &mut HistoryStore,
        esc: Option<&EscState>,
        pass: u32,
        reason: CancelReason,
        extra: Map<String, Value>,
    ) -> ModelOutcome {
        if let Some(state) = esc {
            state.reset();
        }

        let (status, message) = match reason {
            CancelReason::EscapeKey => (
                "Operation canceled via user request.",
                "Human canceled the in-flight request.",
            ),
            CancelReason::Abort => (
                "Operation aborted before completion.",
                "The in-flight request was aborted before completion.",
            ),
        };

        tracing::warn!(pass, reason = reason.as_str(), "{status}");
        self.events.status(StatusLevel::Warn, status);

        let record = self.observations.cancellation(reason.as_str(), message, extra);
        history.push(HistoryEntry::observation(record, pass));
        ModelOutcome::Canceled(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_core::message::Role;
    use openagent_providers::{ScriptedClient, ScriptedReply};

    fn gateway(client: ScriptedClient, events: &EventBus) -> ModelRequestGateway {
        ModelRequestGateway::new(Arc::new(client), events.clone(), RequestSettings::new("gpt-4.1"))
    }

    fn seeded_history() -> HistoryStore {
        let mut history = HistoryStore::with_system_prompt("sys");
        history.push(HistoryEntry::chat(Role::User, "hello", 1));
        history
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Arc<RuntimeEvent>>) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.as_ref().clone());
        }
        events
    }

    #[tokio::test]
    async fn success_leaves_history_alone() {
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let client = ScriptedClient::tool_calls(vec![json!({"message": "hi", "plan": []})]);
        let gateway = gateway(client, &events);
        let esc = EscState::new();
        let mut history = seeded_history();

        let outcome = gateway
            .request_completion(&mut history, Some(&esc), 1)
            .await
            .unwrap();

        assert!(matches!(outcome, ModelOutcome::Success(_)));
        assert_eq!(history.len(), 2);
        assert!(!esc.is_armed());

        let kinds: Vec<&'static str> = drain(&mut rx).iter().map(RuntimeEvent::event_type).collect();
        assert_eq!(kinds.first(), Some(&"thinking"));
        assert!(kinds.contains(&"debug"));
        assert_eq!(
            drain(&mut rx).len(),
            0,
            "all events should have been published before returning"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn escape_cancels_and_appends_one_observation() {
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let gateway = gateway(ScriptedClient::new(vec![ScriptedReply::Hang]), &events);
        let esc = EscState::new();
        let mut history = seeded_history();

        let trigger = esc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger(Some(json!("esc")));
        });

        let outcome = gateway
            .request_completion(&mut history, Some(&esc), 4)
            .await
            .unwrap();

        assert_eq!(outcome, ModelOutcome::Canceled(CancelReason::EscapeKey));
        assert_eq!(history.len(), 3);
        let entry = history.last().unwrap();
        assert_eq!(entry.pass, Some(4));
        let json = entry.content.as_json().unwrap();
        assert_eq!(json["payload"]["observation_for_llm"]["reason"], "escape_key");
        assert_eq!(json["payload"]["observation_metadata"]["esc_payload"], "esc");
        assert!(!esc.is_triggered());
        assert!(gateway.registry().active().is_empty());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            RuntimeEvent::Status { level: StatusLevel::Warn, message, .. }
                if message == "Operation canceled via user request."
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            RuntimeEvent::Thinking { state: ThinkingState::Stop }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts() {
        let events = EventBus::new(64);
        let mut settings = RequestSettings::new("m");
        settings.timeout = Some(Duration::from_secs(30));
        let gateway = ModelRequestGateway::new(
            Arc::new(ScriptedClient::new(vec![ScriptedReply::Hang])),
            events,
            settings,
        );
        let mut history = seeded_history();

        let outcome = gateway.request_completion(&mut history, None, 2).await.unwrap();
        assert_eq!(outcome, ModelOutcome::Canceled(CancelReason::Abort));
        let json = history.last().unwrap().content.as_json().unwrap();
        assert_eq!(json["payload"]["observation_for_llm"]["reason"], "abort");
    }

    #[tokio::test]
    async fn abort_shaped_errors_become_cancellations() {
        let events = EventBus::new(64);
        let client = ScriptedClient::new(vec![ScriptedReply::Fail(ProviderError::Network(
            "request was cancelled".into(),
        ))]);
        let gateway = gateway(client, &events);
        let mut history = seeded_history();

        let outcome = gateway.request_completion(&mut history, None, 1).await.unwrap();
        assert_eq!(outcome, ModelOutcome::Canceled(CancelReason::Abort));
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn other_errors_propagate_after_cleanup() {
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let client = ScriptedClient::new(vec![ScriptedReply::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]);
        let gateway = gateway(client, &events);
        let esc = EscState::new();
        let mut history = seeded_history();

        let err = gateway
            .request_completion(&mut history, Some(&esc), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(history.len(), 2);
        assert!(!esc.is_armed());
        assert!(gateway.registry().active().is_empty());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            RuntimeEvent::Thinking { state: ThinkingState::Stop }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_cancel_aborts_request() {
        let events = EventBus::new(64);
        let gateway = gateway(ScriptedClient::new(vec![ScriptedReply::Hang]), &events);
        let registry = gateway.registry().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.cancel_active();
        });

        let mut history = seeded_history();
        let outcome = gateway.request_completion(&mut history, None, 1).await.unwrap();
        assert_eq!(outcome, ModelOutcome::Canceled(CancelReason::Abort));
    }

    #[test]
    fn request_forces_open_agent_tool() {
        let request = build_model_request("gpt-4.1", &seeded_history(), 3);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "open-agent");
        assert_eq!(request.tool_choice.unwrap().name, "open-agent");
        assert_eq!(request.input.len(), 2);
        assert_eq!(request.max_retries, 3);
    }
}
