//! The system prompt that seeds every session.
//!
//! The base prompt describes the response protocol. Local `AGENTS.md` files
//! found under the workspace root are appended as project guidance, followed
//! by any configured augmentation.

use std::path::{Path, PathBuf};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are OpenAgent, an autonomous software engineering agent working in the user's terminal.

Every reply is a call to the `open-agent` function with a JSON object:

{
  "message": "Markdown for the human",
  "plan": [
    {
      "id": "stable-id",
      "title": "What this step achieves",
      "status": "pending | running | completed | failed | abandoned",
      "priority": 1,
      "waitingForId": ["ids that must complete first"],
      "command": {
        "reason": "Why this command",
        "shell": "bash",
        "run": "the command line",
        "cwd": ".",
        "timeout_sec": 60,
        "filter_regex": "optional regex to keep matching lines",
        "tail_lines": 200
      }
    }
  ]
}

Rules:
- Always send the full plan. Steps that are not completed, failed or abandoned must carry a command.
- Steps run as soon as everything in waitingForId has completed. Lower priority runs first.
- Command results come back as observations attached to each step. Read them before planning again.
- To delegate a self-contained task to a sub-agent, use shell "openagent" with run "<action> <prompt or JSON {\"prompt\", \"summary\", \"maxPasses\"}>".
- When the work is finished, send an empty plan and summarize the outcome in message."#;

const GUIDANCE_FILE: &str = "AGENTS.md";
const SKIPPED_DIRS: [&str; 5] = [".git", "node_modules", "target", ".openagent", "dist"];
const MAX_WALK_DEPTH: usize = 6;

/// Every `AGENTS.md` below `root`, shallowest first.
pub fn find_guidance_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, 0, &mut found);
    found.sort_by_key(|path| (path.components().count(), path.clone()));
    found
}

fn walk(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => {
                if !SKIPPED_DIRS.contains(&name.as_ref()) {
                    walk(&path, depth + 1, found);
                }
            }
            Ok(kind) if kind.is_file() && name == GUIDANCE_FILE => found.push(path),
            _ => {}
        }
    }
}

/// Concatenated guidance, each file under a header naming its path.
pub fn collect_guidance(root: &Path) -> Option<String> {
    let sections: Vec<String> = find_guidance_files(root)
        .into_iter()
        .filter_map(|path| {
            let body = std::fs::read_to_string(&path).ok()?;
            let body = body.trim();
            if body.is_empty() {
                return None;
            }
            let shown = path.strip_prefix(root).unwrap_or(&path);
            Some(format!("--- {} ---\n{body}", shown.display()))
        })
        .collect();

    if sections.is_empty() {
        None
    } else {
        tracing::debug!(files = sections.len(), "Loaded workspace guidance");
        Some(sections.join("\n\n"))
    }
}

/// Base prompt (or the configured override), workspace guidance, then
/// augmentation.
pub fn build_system_prompt(base: Option<&str>, augmentation: Option<&str>, workspace_root: Option<&Path>) -> String {
    let mut prompt = base
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string();

    if let Some(guidance) = workspace_root.and_then(collect_guidance) {
        prompt.push_str("\n\n## Workspace guidance (AGENTS.md)\n\n");
        prompt.push_str(&guidance);
    }

    if let Some(extra) = augmentation.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}
