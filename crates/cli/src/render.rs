//! Terminal rendering of runtime events.

use std::io::Write;
use std::sync::Arc;

use openagent_core::event::{RuntimeEvent, StatusLevel, ThinkingState};
use openagent_core::plan::{PlanStatus, PlanStep};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Lines of command output shown under each result.
const OUTPUT_PREVIEW_LINES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Text,
    /// One serialized event per line on stdout
    Json,
}

/// Where a rendered chunk goes.
#[derive(Debug, PartialEq)]
enum Output {
    Stdout(String),
    Stderr(String),
}

/// Consume events until every publisher is gone.
pub fn spawn(mut rx: broadcast::Receiver<Arc<RuntimeEvent>>, mode: RenderMode) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = TextRenderer::default();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Renderer fell behind; events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let output = match mode {
                RenderMode::Json => serde_json::to_string(event.as_ref())
                    .ok()
                    .map(|line| Output::Stdout(format!("{line}\n"))),
                RenderMode::Text => renderer.render(&event),
            };

            match output {
                Some(Output::Stdout(text)) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Some(Output::Stderr(text)) => {
                    eprint!("{text}");
                    let _ = std::io::stderr().flush();
                }
                None => {}
            }
        }
    })
}

/// Human-oriented text output. Remembers the last plan so identical
/// snapshots are printed once.
#[derive(Debug, Default)]
struct TextRenderer {
    last_plan: Option<String>,
}

impl TextRenderer {
    fn render(&mut self, event: &RuntimeEvent) -> Option<Output> {
        match event {
            RuntimeEvent::Status {
                level,
                message,
                details,
            } => {
                let icon = match level {
                    StatusLevel::Info => "•",
                    StatusLevel::Warn => "⚠️ ",
                    StatusLevel::Error => "❌",
                };
                let mut text = format!("  {icon} {message}\n");
                if let Some(details) = details.as_deref().filter(|d| !d.is_empty()) {
                    text.push_str(&indent(details, "     "));
                }
                Some(Output::Stderr(text))
            }
            RuntimeEvent::Error { message, details } => {
                let mut text = format!("  ❌ {message}\n");
                if let Some(details) = details {
                    text.push_str(&indent(details, "     "));
                }
                Some(Output::Stderr(text))
            }
            RuntimeEvent::AssistantMessage { message } if !message.trim().is_empty() => {
                Some(Output::Stdout(format!("\n{}\n", indent(message.trim_end(), "  "))))
            }
            RuntimeEvent::Plan { steps } => {
                let rendered = format_plan(steps);
                if self.last_plan.as_deref() == Some(rendered.as_str()) {
                    return None;
                }
                self.last_plan = Some(rendered.clone());
                (!steps.is_empty()).then_some(Output::Stdout(rendered))
            }
            RuntimeEvent::CommandResult {
                command, result, ..
            } => {
                let exit = result
                    .exit_code
                    .map_or_else(|| "no exit code".to_string(), |code| format!("exit {code}"));
                let killed = if result.killed { ", killed" } else { "" };
                let mut text = format!(
                    "  $ {} ({exit}{killed}, {}ms)\n",
                    command.run_text(),
                    result.runtime_ms
                );
                for stream in [&result.stdout, &result.stderr] {
                    if !stream.trim().is_empty() {
                        text.push_str(&indent(&preview(stream), "    │ "));
                    }
                }
                Some(Output::Stdout(text))
            }
            RuntimeEvent::Thinking { state } => Some(Output::Stderr(match state {
                ThinkingState::Start => "  Thinking...".into(),
                ThinkingState::Stop => "\r              \r".into(),
            })),
            RuntimeEvent::ContextUsage {
                used,
                total,
                percent_remaining,
                ..
            } => {
                tracing::debug!(used, total, percent_remaining, "Context usage");
                None
            }
            RuntimeEvent::Pass { pass } => {
                tracing::debug!(pass, "Pass started");
                None
            }
            _ => None,
        }
    }
}

fn format_plan(steps: &[PlanStep]) -> String {
    let completed = steps
        .iter()
        .filter(|s| s.status == PlanStatus::Completed)
        .count();
    let mut text = format!("\n  Plan ({completed}/{}):\n", steps.len());
    for step in steps {
        text.push_str(&format!(
            "    [{}] {} {}\n",
            step.status.as_str(),
            step.id,
            step.title
        ));
    }
    text
}

/// The last few lines of `text`, noting how many were hidden.
fn preview(text: &str) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    if lines.len() <= OUTPUT_PREVIEW_LINES {
        return lines.join("\n");
    }
    let hidden = lines.len() - OUTPUT_PREVIEW_LINES;
    format!(
        "… {hidden} more lines\n{}",
        lines[hidden..].join("\n")
    )
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines().map(|line| format!("{prefix}{line}\n")).collect()
}
