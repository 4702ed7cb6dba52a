//! Turns command results and cancellations into observation records.

use chrono::{DateTime, Utc};
use openagent_core::command::CommandResult;
use openagent_core::observation::{ObservationMetadata, ObservationRecord, ObservationSignal};
use openagent_core::plan::PlanCommand;
use openagent_tools::{apply_filter, tail_lines};

/// Replaces both streams when combined output exceeds the limit.
pub const CORRUPT_OUTPUT_MESSAGE: &str = "!!!corrupt command, excessive output!!!";

/// Default combined stdout+stderr limit.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 50 * 1024;

const PREVIEW_LINES: usize = 20;

/// Shaped output for renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPayload {
    pub stdout: String,
    pub stderr: String,
    pub stdout_preview: String,
    pub stderr_preview: String,
}

/// Result of [`ObservationBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltObservation {
    pub render: RenderPayload,
    pub record: ObservationRecord,
    /// Exit code the model sees; oversized output reports 1
    pub exit_code: Option<i32>,
}

/// Stateless builder; the clock is injectable for tests.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    max_output_bytes: usize,
    now: fn() -> DateTime<Utc>,
}

impl Default for ObservationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationBuilder {
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            now: Utc::now,
        }
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn metadata(&self) -> ObservationMetadata {
        ObservationMetadata {
            timestamp: (self.now)(),
            ..ObservationMetadata::now()
        }
    }

    /// Shape a command result for the model.
    ///
    /// Oversized output is replaced wholesale and reported with exit code 1;
    /// otherwise `filter_regex` is applied before `tail_lines`.
    pub fn build(&self, command: &PlanCommand, result: &CommandResult) -> BuiltObservation {
        let (stdout, stderr) = combine_std_streams(&result.stdout, &result.stderr, result.exit_code);
        let exceeds_limit = stdout.len() + stderr.len() > self.max_output_bytes;

        let (filtered_stdout, filtered_stderr, truncated, exit_code) = if exceeds_limit {
            (
                CORRUPT_OUTPUT_MESSAGE.to_string(),
                CORRUPT_OUTPUT_MESSAGE.to_string(),
                true,
                Some(1),
            )
        } else {
            let mut out = stdout.clone();
            let mut err = stderr.clone();
            let mut truncated = false;

            if let Some(pattern) = command.filter_regex.as_deref() {
                out = apply_filter(&out, pattern);
                err = apply_filter(&err, pattern);
                truncated |= out != stdout || err != stderr;
            }

            if let Some(lines) = command.tail_lines.filter(|n| *n > 0) {
                truncated |= line_count(&result.stdout) > lines || line_count(&result.stderr) > lines;
                out = tail_lines(&out, lines);
                err = tail_lines(&err, lines);
            }

            (out, err, truncated, result.exit_code)
        };

        let render = RenderPayload {
            stdout_preview: build_preview(&filtered_stdout),
            stderr_preview: build_preview(&filtered_stderr),
            stdout: filtered_stdout.clone(),
            stderr: filtered_stderr.clone(),
        };

        let mut metadata = self.metadata();
        metadata.runtime_ms = Some(result.runtime_ms);
        metadata.killed = Some(result.killed);

        let record = ObservationRecord::new(ObservationSignal::CommandOutput {
            stdout: filtered_stdout,
            stderr: filtered_stderr,
            exit_code,
            truncated,
        })
        .with_metadata(metadata);

        BuiltObservation {
            render,
            record,
            exit_code,
        }
    }

    /// Observation for a canceled or aborted request.
    pub fn cancellation(
        &self,
        reason: &str,
        message: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> ObservationRecord {
        let mut metadata = self.metadata();
        metadata.extra = extra;
        ObservationRecord::new(ObservationSignal::Canceled {
            reason: reason.into(),
            message: message.into(),
        })
        .with_metadata(metadata)
    }

    /// Wrap any other signal with a timestamp.
    pub fn signal(&self, signal: ObservationSignal) -> ObservationRecord {
        ObservationRecord::new(signal).with_metadata(self.metadata())
    }
}

/// Successful commands that only wrote to stderr (compilers, git) get their
/// stderr folded into stdout.
pub fn combine_std_streams(stdout: &str, stderr: &str, exit_code: Option<i32>) -> (String, String) {
    if exit_code == Some(0) && !stderr.trim().is_empty() {
        let combined = if stdout.is_empty() {
            stderr.to_string()
        } else if stdout.ends_with('\n') {
            format!("{stdout}{stderr}")
        } else {
            format!("{stdout}\n{stderr}")
        };
        return (combined, String::new());
    }
    (stdout.to_string(), stderr.to_string())
}

fn line_count(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.split('\n').count()
    }
}

/// First few lines of `text`, with a marker when lines were hidden.
pub fn build_preview(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= PREVIEW_LINES {
        return text.to_string();
    }
    format!(
        "{}\n... ({} more lines)",
        lines[..PREVIEW_LINES].join("\n"),
        lines.len() - PREVIEW_LINES
    )
}
