//! Assistant response validation.
//!
//! Two independent, side-effect-free passes:
//!
//! 1. **Schema**: structural validation against [`RESPONSE_SCHEMA`]. The
//!    compiled `jsonschema` validator is authoritative for validity; a small
//!    walker over the same schema produces model-friendly `{path, message,
//!    keyword}` issues.
//! 2. **Semantic**: protocol rules the schema cannot express, such as "an
//!    open step must carry a command".
//!
//! The caller decides what to do with failures; nothing here touches history.

use std::sync::LazyLock;

use openagent_core::observation::SchemaIssue;
use openagent_core::plan::PlanStatus;
use serde_json::{Map, Value};

use crate::schema::RESPONSE_SCHEMA;

static COMPILED_SCHEMA: LazyLock<Result<jsonschema::Validator, String>> =
    LazyLock::new(|| jsonschema::validator_for(&RESPONSE_SCHEMA).map_err(|e| e.to_string()));

/// Statuses the semantic pass accepts.
const ALLOWED_STATUSES: [PlanStatus; 5] = PlanStatus::ALL;

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Render a path like `response.plan[0]['odd key']`.
fn format_path(segments: &[Segment]) -> String {
    let mut label = String::from("response");
    for segment in segments {
        match segment {
            Segment::Index(i) => label.push_str(&format!("[{i}]")),
            Segment::Key(key) if is_identifier(key) => {
                label.push('.');
                label.push_str(key);
            }
            Segment::Key(key) => label.push_str(&format!("['{key}']")),
        }
    }
    label
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value
            .as_f64()
            .is_some_and(|n| n.is_finite() && n.fract() == 0.0),
        _ => true,
    }
}

fn expected_types(schema: &Map<String, Value>) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn enum_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct SchemaWalker {
    issues: Vec<SchemaIssue>,
}

impl SchemaWalker {
    fn report(&mut self, path: &[Segment], keyword: &str, message: String) {
        self.issues.push(SchemaIssue {
            path: format_path(path),
            message,
            keyword: keyword.into(),
        });
    }

    fn walk(&mut self, schema: &Value, value: &Value, path: &mut Vec<Segment>) {
        let Some(schema) = schema.as_object() else {
            return;
        };

        let types = expected_types(schema);
        if !types.is_empty() && !types.iter().any(|t| type_matches(t, value)) {
            self.report(path, "type", format!("Must be of type {}.", types.join(",")));
            return;
        }

        if let Some(Value::Array(allowed)) = schema.get("enum")
            && !allowed.contains(value)
        {
            let labels: Vec<String> = allowed.iter().map(enum_label).collect();
            self.report(path, "enum", format!("Must be one of: {}.", labels.join(", ")));
        }

        if let (Some(minimum), Some(n)) = (schema.get("minimum").and_then(Value::as_f64), value.as_f64())
            && n < minimum
        {
            self.report(path, "minimum", format!("Must be >= {minimum}."));
        }

        match value {
            Value::Object(object) => self.walk_object(schema, object, path),
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items") {
                    for (index, item) in items.iter().enumerate() {
                        path.push(Segment::Index(index));
                        self.walk(item_schema, item, path);
                        path.pop();
                    }
                }
            }
            _ => {}
        }
    }

    fn walk_object(
        &mut self,
        schema: &Map<String, Value>,
        object: &Map<String, Value>,
        path: &mut Vec<Segment>,
    ) {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    self.report(path, "required", format!("Missing required property \"{key}\"."));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (key, child) in object {
            match properties.and_then(|p| p.get(key)) {
                Some(child_schema) => {
                    path.push(Segment::Key(key.clone()));
                    self.walk(child_schema, child, path);
                    path.pop();
                }
                None if closed => {
                    self.report(
                        path,
                        "additionalProperties",
                        format!("Unexpected property \"{key}\"."),
                    );
                }
                None => {}
            }
        }
    }
}

/// Validate `payload` against the response schema.
///
/// Returns an empty list when the payload is valid.
pub fn validate_response_schema(payload: &Value) -> Vec<SchemaIssue> {
    let validator = match COMPILED_SCHEMA.as_ref() {
        Ok(validator) => validator,
        Err(error) => {
            tracing::error!(%error, "Response schema failed to compile");
            return vec![SchemaIssue {
                path: "response".into(),
                message: "Schema validation failed for assistant response.".into(),
                keyword: "unknown".into(),
            }];
        }
    };

    if validator.is_valid(payload) {
        return Vec::new();
    }

    let mut walker = SchemaWalker { issues: Vec::new() };
    walker.walk(&RESPONSE_SCHEMA, payload, &mut Vec::new());
    if !walker.issues.is_empty() {
        return walker.issues;
    }

    validator
        .iter_errors(payload)
        .map(|error| SchemaIssue {
            path: "response".into(),
            message: error.to_string(),
            keyword: "unknown".into(),
        })
        .collect()
}

/// The observation message for a failed schema check.
pub fn summarize_schema_issues(issues: &[SchemaIssue]) -> String {
    match issues {
        [] => "Schema validation failed.".into(),
        [only] => format!("Schema validation failed: {}: {}", only.path, only.message),
        many => {
            let lines: Vec<String> = many
                .iter()
                .map(|issue| format!("- {}: {}", issue.path, issue.message))
                .collect();
            format!(
                "Schema validation failed. Please address the following issues:\n{}",
                lines.join("\n")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Semantic validation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PlanValidationState {
    first_open_status: Option<String>,
    has_open_steps: bool,
}

fn trimmed_str<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).map(str::trim).unwrap_or("")
}

fn has_executable_command(command: Option<&Value>) -> bool {
    let Some(Value::Object(command)) = command else {
        return false;
    };
    !trimmed_str(command, "run").is_empty() || !trimmed_str(command, "shell").is_empty()
}

fn is_terminal(status: &str) -> bool {
    PlanStatus::parse(status).is_some_and(|s| s.is_terminal())
}

fn validate_plan_item(item: &Value, path: &str, state: &mut PlanValidationState, errors: &mut Vec<String>) {
    let Some(step) = item.as_object() else {
        errors.push(format!("{path} must be an object."));
        return;
    };

    if trimmed_str(step, "id").is_empty() {
        let hint = if trimmed_str(step, "step").is_empty() {
            ""
        } else {
            " Provide an \"id\" value instead of \"step\" to satisfy the schema."
        };
        errors.push(format!("{path} is missing a non-empty \"id\" label.{hint}"));
    }

    if trimmed_str(step, "title").is_empty() {
        errors.push(format!("{path} is missing a non-empty \"title\"."));
    }

    let status = trimmed_str(step, "status").to_lowercase();
    if status.is_empty() {
        errors.push(format!("{path} is missing a valid \"status\"."));
    } else if PlanStatus::parse(&status).is_none_or(|s| !ALLOWED_STATUSES.contains(&s)) {
        let allowed: Vec<&str> = ALLOWED_STATUSES.iter().map(PlanStatus::as_str).collect();
        errors.push(format!("{path}.status must be one of: {}.", allowed.join(", ")));
    }

    if state.first_open_status.is_none() && status != PlanStatus::Completed.as_str() {
        state.first_open_status = Some(status.clone());
    }

    let command = step.get("command");
    if command.is_some_and(|c| !c.is_null() && !c.is_object()) {
        errors.push(format!("{path}.command must be an object when present."));
    }

    let command_has_payload = has_executable_command(command);

    if !is_terminal(&status) {
        state.has_open_steps = true;
        if !command_has_payload {
            let label = if status.is_empty() { "active" } else { status.as_str() };
            errors.push(format!(
                "{path} requires a non-empty command while the step is {label}."
            ));
        }
    } else if command.is_some_and(Value::is_object) && !command_has_payload {
        errors.push(format!("{path}.command must include execution details when provided."));
    }
}

/// Outcome of the semantic pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticReport {
    pub errors: Vec<String>,
    /// Status of the first step that is not `completed`
    pub first_open_status: Option<String>,
    pub has_open_steps: bool,
}

impl SemanticReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The observation message for a failed semantic check.
    pub fn summary(&self) -> String {
        match self.errors.as_slice() {
            [only] => only.clone(),
            many => format!(
                "Detected {} validation issues. Please fix them and resend a compliant response.",
                many.len()
            ),
        }
    }
}

/// Check protocol rules on a parsed response.
pub fn validate_response(payload: &Value) -> SemanticReport {
    let Some(response) = payload.as_object() else {
        return SemanticReport {
            errors: vec!["Assistant response must be a JSON object.".into()],
            ..SemanticReport::default()
        };
    };

    let mut errors = Vec::new();

    if response.get("message").is_some_and(|m| !m.is_null() && !m.is_string()) {
        errors.push("\"message\" must be a string when provided.".into());
    }

    let mut state = PlanValidationState::default();
    match response.get("plan") {
        None => {}
        Some(Value::Array(plan)) => {
            for (index, item) in plan.iter().enumerate() {
                validate_plan_item(item, &format!("plan[{index}]"), &mut state, &mut errors);
            }
        }
        Some(_) => errors.push("\"plan\" must be an array.".into()),
    }

    SemanticReport {
        errors,
        first_open_status: state.first_open_status,
        has_open_steps: state.has_open_steps,
    }
}
