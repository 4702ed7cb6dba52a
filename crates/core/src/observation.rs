//! Observation records: structured feedback the model reads next pass.
//!
//! An observation is produced once per command execution, cancellation, or
//! validation failure and consumed once to build a history entry. The signal
//! variants are a closed set; [`ObservationSignal::to_value`] is the single
//! place that decides how each one looks on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// One structural schema violation, already phrased for the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    /// Dotted path such as `response.plan[0].status`
    pub path: String,
    /// Human-readable description
    pub message: String,
    /// The JSON Schema keyword that failed (`required`, `enum`, ...)
    pub keyword: String,
}

/// What the model is told.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationSignal {
    /// Shaped output of an executed command.
    CommandOutput {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        truncated: bool,
    },
    /// The in-flight request was canceled (ESC) or aborted (timeout).
    Canceled { reason: String, message: String },
    /// A human declined to run the proposed command.
    DeclinedByHuman { message: String },
    /// The assistant reply was not valid JSON.
    JsonParseError {
        message: String,
        attempts: u32,
        response_snippet: String,
    },
    /// The assistant reply failed the structural schema.
    SchemaValidationError {
        message: String,
        details: Vec<SchemaIssue>,
        response_snippet: String,
    },
    /// The assistant reply failed semantic protocol checks.
    ResponseValidationError { message: String, details: Vec<String> },
}

impl ObservationSignal {
    /// Serialize to the JSON object shown to the model.
    pub fn to_value(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ObservationSignal::CommandOutput {
                stdout,
                stderr,
                exit_code,
                truncated,
            } => json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": exit_code,
                "truncated": truncated,
            }),
            ObservationSignal::Canceled { reason, message } => json!({
                "operation_canceled": true,
                "reason": reason,
                "message": message,
            }),
            ObservationSignal::DeclinedByHuman { message } => json!({
                "canceled_by_human": true,
                "message": message,
            }),
            ObservationSignal::JsonParseError {
                message,
                attempts,
                response_snippet,
            } => json!({
                "json_parse_error": true,
                "message": message,
                "attempts": attempts,
                "response_snippet": response_snippet,
            }),
            ObservationSignal::SchemaValidationError {
                message,
                details,
                response_snippet,
            } => json!({
                "schema_validation_error": true,
                "message": message,
                "details": details,
                "response_snippet": response_snippet,
            }),
            ObservationSignal::ResponseValidationError { message, details } => json!({
                "response_validation_error": true,
                "message": message,
                "details": details,
            }),
        }
    }

    /// One-line summary the runtime writes in its own voice.
    pub fn summary(&self) -> String {
        match self {
            ObservationSignal::CommandOutput {
                exit_code,
                truncated,
                ..
            } => {
                let mut summary =
                    String::from("I executed the approved command from the active plan.");
                if let Some(code) = exit_code {
                    summary.push_str(&format!(" It finished with exit code {code}."));
                }
                if *truncated {
                    summary.push_str(
                        " I truncated the output to keep the history compact.",
                    );
                }
                summary
            }
            ObservationSignal::Canceled { .. } => {
                "The operation was canceled before completion.".into()
            }
            ObservationSignal::DeclinedByHuman { .. } => {
                "A human reviewer declined the proposed command.".into()
            }
            ObservationSignal::JsonParseError { .. } => {
                "I could not parse the previous assistant JSON response.".into()
            }
            ObservationSignal::SchemaValidationError { .. } => {
                "The previous assistant response failed schema validation.".into()
            }
            ObservationSignal::ResponseValidationError { .. } => {
                "The previous assistant response failed protocol validation checks.".into()
            }
        }
    }

    /// The `message` field carried by error-style signals.
    pub fn message(&self) -> Option<&str> {
        match self {
            ObservationSignal::CommandOutput { .. } => None,
            ObservationSignal::Canceled { message, .. }
            | ObservationSignal::DeclinedByHuman { message }
            | ObservationSignal::JsonParseError { message, .. }
            | ObservationSignal::SchemaValidationError { message, .. }
            | ObservationSignal::ResponseValidationError { message, .. } => Some(message),
        }
    }

    /// Exit code for command output.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ObservationSignal::CommandOutput { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

impl Serialize for ObservationSignal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Bookkeeping the runtime attaches to an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed: Option<bool>,

    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Free-form extras (e.g. the ESC payload).
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObservationMetadata {
    pub fn now() -> Self {
        Self {
            runtime_ms: None,
            killed: None,
            timestamp: Utc::now(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A complete observation: what the model sees plus runtime metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub observation_for_llm: ObservationSignal,
    pub observation_metadata: ObservationMetadata,
}

impl ObservationRecord {
    pub fn new(signal: ObservationSignal) -> Self {
        Self {
            observation_for_llm: signal,
            observation_metadata: ObservationMetadata::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: ObservationMetadata) -> Self {
        self.observation_metadata = metadata;
        self
    }

    /// JSON form stored on plan steps.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_signal_shape() {
        let signal = ObservationSignal::Canceled {
            reason: "escape_key".into(),
            message: "Human canceled the in-flight request.".into(),
        };
        let value = signal.to_value();
        assert_eq!(value["operation_canceled"], true);
        assert_eq!(value["reason"], "escape_key");
    }

    #[test]
    fn command_summary_mentions_exit_code_and_truncation() {
        let signal = ObservationSignal::CommandOutput {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: Some(2),
            truncated: true,
        };
        let summary = signal.summary();
        assert!(summary.contains("exit code 2"));
        assert!(summary.contains("truncated"));
    }

    #[test]
    fn record_serializes_metadata_extras_inline() {
        let record = ObservationRecord::new(ObservationSignal::DeclinedByHuman {
            message: "no".into(),
        })
        .with_metadata(ObservationMetadata::now().with_extra("source", "test".into()));
        let value = record.to_value();
        assert_eq!(value["observation_for_llm"]["canceled_by_human"], true);
        assert_eq!(value["observation_metadata"]["source"], "test");
        assert!(value["observation_metadata"]["timestamp"].is_string());
        assert!(value["observation_metadata"].get("runtime_ms").is_none());
    }
}
