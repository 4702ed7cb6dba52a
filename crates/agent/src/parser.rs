//! Assistant response parsing with recovery.
//!
//! Tries, in order: the raw text, the text with bare line breaks escaped, the
//! body of a fenced code block, and the first balanced `{...}`/`[...]` slice.
//! Successfully parsed payloads have their commands normalized so validators
//! see one shape.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Direct,
    EscapedNewlines,
    CodeFence,
    BalancedSlice,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Direct => "direct",
            RecoveryStrategy::EscapedNewlines => "escaped_newlines",
            RecoveryStrategy::CodeFence => "code_fence",
            RecoveryStrategy::BalancedSlice => "balanced_slice",
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseAttempt {
    pub strategy: RecoveryStrategy,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed {
        value: Value,
        strategy: RecoveryStrategy,
    },
    Failed {
        error: String,
        attempts: Vec<ParseAttempt>,
    },
}

/// Parse the assistant's JSON payload.
pub fn parse_assistant_response(raw: &str) -> ParseOutcome {
    let mut attempts = Vec::new();
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return ParseOutcome::Failed {
            error: "Assistant response was empty or missing.".into(),
            attempts,
        };
    }

    let candidates = [
        (RecoveryStrategy::Direct, Some(trimmed.to_string())),
        (RecoveryStrategy::EscapedNewlines, escape_bare_line_breaks(trimmed)),
        (RecoveryStrategy::CodeFence, extract_code_fence(trimmed)),
        (RecoveryStrategy::BalancedSlice, extract_balanced_json(trimmed)),
    ];

    for (strategy, candidate) in candidates {
        let Some(text) = candidate else { continue };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                return ParseOutcome::Parsed {
                    value: normalize_payload(value),
                    strategy,
                };
            }
            Err(e) => attempts.push(ParseAttempt {
                strategy,
                error: e.to_string(),
            }),
        }
    }

    let mut error = String::from("Failed to parse assistant JSON response.");
    if let Some(first) = attempts.first() {
        error.push(' ');
        error.push_str(&first.error);
    }
    ParseOutcome::Failed { error, attempts }
}

fn escape_bare_line_breaks(text: &str) -> Option<String> {
    if !text.contains('\n') && !text.contains('\r') {
        return None;
    }
    Some(text.replace("\r\n", "\\n").replace('\n', "\\n"))
}

fn extract_code_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    let end = after.find("```")?;
    let body = after[..end].trim();
    (!body.is_empty()).then(|| body.to_string())
}

fn extract_balanced_json(text: &str) -> Option<String> {
    let mut in_string = false;
    let mut escaped = false;
    let mut stack: Vec<char> = Vec::new();
    let mut start = None;

    for (index, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => {
                if stack.is_empty() {
                    start = Some(index);
                }
                stack.push(if c == '{' { '}' } else { ']' });
            }
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    stack.clear();
                    start = None;
                    continue;
                }
                if stack.is_empty()
                    && let Some(begin) = start
                {
                    return Some(text[begin..=index].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// camelCase spellings of command fields.
const COMMAND_FIELD_ALIASES: [(&str, &str); 3] = [
    ("timeoutSec", "timeout_sec"),
    ("filterRegex", "filter_regex"),
    ("tailLines", "tail_lines"),
];

/// Bring `command` into the `{run, shell, ...}` object shape.
///
/// Strings and string arrays become `{run}`; `cmd`/`command_line` aliases
/// fold into `run`; a nested `run` object is flattened. camelCase field
/// names are renamed unless the snake_case key is already present.
pub fn normalize_command(command: Value) -> Value {
    match command {
        Value::String(s) => {
            let run = s.trim();
            if run.is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::json!({ "run": run })
            }
        }
        Value::Array(parts) => {
            let parts: Vec<String> = parts
                .iter()
                .filter(|p| !p.is_null())
                .map(|p| match p {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|p| !p.is_empty())
                .collect();
            if parts.is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::json!({ "run": parts.join(" ") })
            }
        }
        Value::Object(mut map) => {
            if let Some(Value::Object(nested)) = map.get("run").cloned() {
                map.remove("run");
                let run = first_non_empty([
                    nested.get("command"),
                    nested.get("run"),
                    nested.get("cmd"),
                    nested.get("command_line"),
                ]);
                let shell = first_non_empty([nested.get("shell"), map.get("shell")]);
                for (key, value) in nested {
                    if !matches!(key.as_str(), "command" | "run" | "cmd" | "command_line" | "shell") {
                        map.insert(key, value);
                    }
                }
                if let Some(run) = run {
                    map.insert("run".into(), Value::String(run));
                }
                if let Some(shell) = shell {
                    map.insert("shell".into(), Value::String(shell));
                }
            }

            let run = first_non_empty([map.get("run"), map.get("cmd"), map.get("command_line")]);
            map.remove("cmd");
            map.remove("command_line");
            if let Some(run) = run {
                map.insert("run".into(), Value::String(run));
            }

            for (alias, field) in COMMAND_FIELD_ALIASES {
                if let Some(value) = map.remove(alias) {
                    map.entry(field).or_insert(value);
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn normalize_step(step: Value) -> Value {
    let Value::Object(mut map) = step else {
        return step;
    };

    if let Some(command) = map.remove("command") {
        map.insert("command".into(), normalize_command(command));
    }

    if map.contains_key("age") && !map.get("age").is_some_and(|age| age.as_u64().is_some()) {
        map.insert("age".into(), Value::from(0));
    }

    Value::Object(map)
}

fn normalize_payload(value: Value) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };

    if let Some(Value::Array(plan)) = map.get_mut("plan") {
        let steps = std::mem::take(plan);
        *plan = steps.into_iter().map(normalize_step).collect();
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(raw: &str) -> (Value, RecoveryStrategy) {
        match parse_assistant_response(raw) {
            ParseOutcome::Parsed { value, strategy } => (value, strategy),
            ParseOutcome::Failed { error, .. } => panic!("parse failed: {error}"),
        }
    }

    #[test]
    fn direct_json() {
        let (value, strategy) = parsed(r#"{"message":"hi","plan":[]}"#);
        assert_eq!(strategy, RecoveryStrategy::Direct);
        assert_eq!(value["message"], "hi");
    }

    #[test]
    fn bare_newlines_inside_strings() {
        let (value, strategy) = parsed("{\"message\":\"line one\nline two\",\"plan\":[]}");
        assert_eq!(strategy, RecoveryStrategy::EscapedNewlines);
        assert_eq!(value["message"], "line one\nline two");
    }

    #[test]
    fn fenced_block() {
        let (value, strategy) = parsed("Here you go:\n```json\n{\"message\":\"x\",\"plan\":[]}\n```");
        assert_eq!(strategy, RecoveryStrategy::CodeFence);
        assert_eq!(value["message"], "x");
    }

    #[test]
    fn balanced_slice() {
        let (value, strategy) = parsed(r#"Sure! {"message":"a } b","plan":[]} trailing"#);
        assert_eq!(strategy, RecoveryStrategy::BalancedSlice);
        assert_eq!(value["message"], "a } b");
    }

    #[test]
    fn failure_lists_attempts() {
        match parse_assistant_response("not json at all") {
            ParseOutcome::Failed { error, attempts } => {
                assert!(error.starts_with("Failed to parse assistant JSON response."));
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].strategy, RecoveryStrategy::Direct);
            }
            other => panic!("expected failure, got {other:?}"),
        }

        assert!(matches!(
            parse_assistant_response("   "),
            ParseOutcome::Failed { .. }
        ));
    }

    #[test]
    fn command_shapes_normalize() {
        assert_eq!(normalize_command(json!(" ls -la ")), json!({"run": "ls -la"}));
        assert_eq!(normalize_command(json!(["git", "status"])), json!({"run": "git status"}));
        assert_eq!(
            normalize_command(json!({"cmd": "pwd", "shell": "bash"})),
            json!({"run": "pwd", "shell": "bash"})
        );
        assert_eq!(
            normalize_command(json!({"run": {"command": "ls", "shell": "sh"}, "cwd": "src"})),
            json!({"run": "ls", "shell": "sh", "cwd": "src"})
        );
        assert_eq!(normalize_command(Value::Null), Value::Null);
    }

    #[test]
    fn camel_case_command_fields_are_renamed() {
        assert_eq!(
            normalize_command(json!({"run": "ls", "timeoutSec": 5, "filterRegex": "rs$", "tailLines": 3})),
            json!({"run": "ls", "timeout_sec": 5, "filter_regex": "rs$", "tail_lines": 3})
        );
        assert_eq!(
            normalize_command(json!({"run": "ls", "timeout_sec": 30, "timeoutSec": 5})),
            json!({"run": "ls", "timeout_sec": 30})
        );
        assert_eq!(
            normalize_command(json!({"run": {"command": "ls", "tailLines": 2}})),
            json!({"run": "ls", "tail_lines": 2})
        );
    }

    #[test]
    fn camel_case_command_fields_pass_schema_validation() {
        let (value, _) = parsed(
            r#"{"message":"m","plan":[{"id":"a","title":"t","status":"pending",
                "command":{"shell":"bash","run":"ls","timeoutSec":5,"tailLines":3}}]}"#,
        );
        assert_eq!(crate::validator::validate_response_schema(&value), vec![]);
        let command: openagent_core::plan::PlanCommand =
            serde_json::from_value(value["plan"][0]["command"].clone()).unwrap();
        assert_eq!(command.timeout_sec, Some(5));
        assert_eq!(command.tail_lines, Some(3));
    }

    #[test]
    fn steps_normalize_in_payload() {
        let (value, _) = parsed(
            r#"{"message":"m","plan":[{"id":"a","title":"t","status":"pending","command":"ls","age":-3}]}"#,
        );
        assert_eq!(value["plan"][0]["command"], json!({"run": "ls"}));
        assert_eq!(value["plan"][0]["age"], 0);
    }

    #[test]
    fn non_array_plan_is_kept() {
        let (value, _) = parsed(r#"{"message":"m","plan":"oops"}"#);
        assert_eq!(value["plan"], "oops");
    }
}
