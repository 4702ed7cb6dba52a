//! Command allowlist: which commands may run without asking the human.
//!
//! A command is pre-approved only when the raw string passes the safety
//! rules (no chaining, pipes, substitution, redirection or sudo), its shell is
//! `bash`/`sh`, its base executable is listed, its subcommand (if the entry
//! restricts them) is listed, and the executable-specific argument rules hold.

use std::path::Path;

use openagent_config::AllowlistEntry;
use openagent_core::plan::PlanCommand;
use regex_lite::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

/// Executables whose allowlisted subcommand must be the last token.
const BARE_SUBCOMMAND_TOOLS: &[&str] = &["python", "python3", "pip", "node", "npm"];

/// Patterns that make a raw command string unsafe to auto-approve.
const FORBIDDEN_PATTERNS: &[&str] = &[
    r"\r|\n",
    r";|&&|\|\|",
    r"\|",
    r"`",
    r"\$\(",
    r"<\s*\(",
    r">\s*\(",
    r"(^|[^&])&([^&]|$)",
    r"<<<",
    r"<<",
    r"&>",
    r"^\s*sudo\b",
    r"(^|\s)[0-9]*>>?\s",
    r"\d?>&\d?",
];

#[derive(Debug, thiserror::Error)]
pub enum AllowlistError {
    #[error("Failed to read allowlist file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse allowlist file {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct AllowlistFile {
    #[serde(default)]
    allowlist: Vec<AllowlistEntry>,
}

/// Whether `pattern` matches `text`. A pattern that fails to compile counts as
/// a match so the safety check fails closed.
fn hits(pattern: &str, text: &str) -> bool {
    Regex::new(pattern).map_or(true, |re| re.is_match(text))
}

fn hits_ignore_case(pattern: &str, text: &str) -> bool {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_or(true, |re| re.is_match(text))
}

/// Lightweight check rejecting obviously unsafe shell strings.
pub fn is_command_string_safe(raw: &str) -> bool {
    let run = raw.trim();
    if run.is_empty() {
        return false;
    }
    !FORBIDDEN_PATTERNS.iter().any(|pattern| hits(pattern, run))
}

/// The set of pre-approved commands.
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    entries: Vec<AllowlistEntry>,
}

impl CommandAllowlist {
    pub fn new(entries: Vec<AllowlistEntry>) -> Self {
        Self { entries }
    }

    /// Load extra entries from a JSON file shaped `{"allowlist": [...]}`.
    ///
    /// A missing file yields an empty allowlist.
    pub fn load(path: &Path) -> Result<Self, AllowlistError> {
        if !path.exists() {
            debug!(path = %path.display(), "No allowlist file, using none");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| AllowlistError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let parsed: AllowlistFile =
            serde_json::from_str(&raw).map_err(|e| AllowlistError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::new(parsed.allowlist))
    }

    /// Merge configured entries with the file entries, warning (not failing)
    /// when the file cannot be read.
    pub fn from_config(entries: &[AllowlistEntry], file: &Path) -> Self {
        let mut merged = entries.to_vec();
        match Self::load(file) {
            Ok(extra) => merged.extend(extra.entries),
            Err(e) => warn!(error = %e, "Ignoring allowlist file"),
        }
        Self::new(merged)
    }

    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    fn find(&self, base: &str) -> Option<&AllowlistEntry> {
        self.entries.iter().find(|entry| entry.name == base)
    }

    /// Decide whether the command may run without human approval.
    pub fn is_preapproved(&self, command: &PlanCommand) -> bool {
        let run = command.run_text().trim();
        if run.is_empty() || !is_command_string_safe(run) {
            return false;
        }

        if let Some(shell) = command.shell.as_deref() {
            let shell = shell.trim().to_lowercase();
            if shell != "bash" && shell != "sh" {
                return false;
            }
        }

        // Unbalanced quotes never pre-approve
        let Some(tokens) = shlex::split(run) else {
            return false;
        };
        let Some(first) = tokens.first() else {
            return false;
        };
        let base = Path::new(first)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(first.as_str());

        let Some(entry) = self.find(base) else {
            return false;
        };

        let sub = tokens
            .iter()
            .skip(1)
            .find(|token| !token.starts_with('-'))
            .map(String::as_str)
            .unwrap_or("");
        if !subcommand_allowed(base, sub, entry, &tokens) {
            return false;
        }

        command_specific_rules(base, &tokens)
    }
}

fn subcommand_allowed(base: &str, sub: &str, entry: &AllowlistEntry, tokens: &[String]) -> bool {
    if entry.subcommands.is_empty() {
        return true;
    }
    if !entry.subcommands.iter().any(|allowed| allowed == sub) {
        return false;
    }
    if BARE_SUBCOMMAND_TOOLS.contains(&base) {
        return match tokens.iter().position(|token| token == sub) {
            Some(index) => tokens.len() <= index + 1,
            None => true,
        };
    }
    true
}

fn command_specific_rules(base: &str, tokens: &[String]) -> bool {
    let args = &tokens[1..];
    let joined = format!(" {} ", args.join(" "));

    match base {
        "sed" => !hits(r"(^|\s)-i(\b|\s)", &joined),
        "find" => !hits(r"\s-exec\b", &joined) && !hits(r"\s-delete\b", &joined),
        "curl" => curl_allowed(args, &joined),
        "wget" => wget_allowed(args, &joined),
        "ping" => ping_allowed(args),
        _ => true,
    }
}

fn curl_allowed(args: &[String], joined: &str) -> bool {
    if hits_ignore_case(r"(^|\s)-X\s*(POST|PUT|PATCH|DELETE)\b", joined) {
        return false;
    }
    if hits_ignore_case(
        r"(^|\s)(--data(-binary|-raw|-urlencode)?|-d|--form|-F|--upload-file|-T)\b",
        joined,
    ) {
        return false;
    }
    if hits(r"(^|\s)(-O|--remote-name|--remote-header-name)\b", joined) {
        return false;
    }

    for (index, token) in args.iter().enumerate() {
        if token == "-o" || token == "--output" {
            let target = args.get(index + 1).map(String::as_str).unwrap_or("");
            if target != "-" {
                return false;
            }
        }
        if token.starts_with("-o") && token.len() > 2 {
            return false;
        }
    }
    true
}

fn wget_allowed(args: &[String], joined: &str) -> bool {
    if hits(r"\s--spider\b", joined) {
        return true;
    }

    for (index, token) in args.iter().enumerate() {
        if token == "-O" || token == "--output-document" {
            let target = args.get(index + 1).map(String::as_str).unwrap_or("");
            if target != "-" {
                return false;
            }
        }
        if token.starts_with("-O") && token != "-O" {
            return false;
        }
    }
    true
}

fn ping_allowed(args: &[String]) -> bool {
    let Some(index) = args.iter().position(|token| token == "-c") else {
        return false;
    };
    args.get(index + 1)
        .and_then(|count| count.parse::<i64>().ok())
        .is_some_and(|count| (1..=3).contains(&count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> CommandAllowlist {
        CommandAllowlist::new(vec![
            AllowlistEntry::new("ls"),
            AllowlistEntry::new("sed"),
            AllowlistEntry::new("find"),
            AllowlistEntry::new("curl"),
            AllowlistEntry::new("wget"),
            AllowlistEntry::new("ping"),
            AllowlistEntry {
                name: "git".into(),
                subcommands: vec!["status".into(), "diff".into()],
            },
            AllowlistEntry {
                name: "npm".into(),
                subcommands: vec!["test".into()],
            },
        ])
    }

    fn cmd(run: &str) -> PlanCommand {
        PlanCommand::shell(run)
    }

    #[test]
    fn safe_strings() {
        assert!(is_command_string_safe("ls -la"));
        assert!(is_command_string_safe("git log --oneline"));
    }

    #[test]
    fn unsafe_strings() {
        for run in [
            "",
            "ls; rm -rf /",
            "ls && whoami",
            "ls | wc -l",
            "echo `id`",
            "echo $(id)",
            "diff <(ls) <(ls)",
            "sleep 10 &",
            "cat <<EOF",
            "cat <<< hi",
            "ls &> out",
            "sudo ls",
            "ls > out.txt",
            "ls 2>&1",
            "ls\nrm x",
        ] {
            assert!(!is_command_string_safe(run), "expected unsafe: {run:?}");
        }
    }

    #[test]
    fn base_name_must_be_listed() {
        let list = allowlist();
        assert!(list.is_preapproved(&cmd("ls -la")));
        assert!(list.is_preapproved(&cmd("/bin/ls -la")));
        assert!(!list.is_preapproved(&cmd("rm -rf build")));
    }

    #[test]
    fn quoted_arguments_split_like_a_shell() {
        let list = allowlist();
        assert!(list.is_preapproved(&cmd(r#"sed -n '1,20p' "src/my file.rs""#)));
        assert!(!list.is_preapproved(&cmd(r#""rm" -rf build"#)));
        assert!(list.is_preapproved(&cmd(r#"find . -name "*.rs""#)));
        assert!(!list.is_preapproved(&cmd(r#"find . -name "x" "-delete""#)));
    }

    #[test]
    fn unbalanced_quotes_are_not_preapproved() {
        let list = allowlist();
        assert!(!list.is_preapproved(&cmd("ls 'unterminated")));
        assert!(!list.is_preapproved(&cmd(r#"git status "oops"#)));
    }

    #[test]
    fn shell_must_be_bash_or_sh() {
        let list = allowlist();
        let mut command = cmd("ls");
        command.shell = Some("zsh".into());
        assert!(!list.is_preapproved(&command));
        command.shell = Some(" SH ".into());
        assert!(list.is_preapproved(&command));
    }

    #[test]
    fn subcommands_are_restricted() {
        let list = allowlist();
        assert!(list.is_preapproved(&cmd("git status")));
        assert!(list.is_preapproved(&cmd("git --no-pager diff")));
        assert!(!list.is_preapproved(&cmd("git push")));
        assert!(list.is_preapproved(&cmd("npm test")));
        assert!(!list.is_preapproved(&cmd("npm test -- --watch")));
    }

    #[test]
    fn command_specific_rules_apply() {
        let list = allowlist();
        assert!(list.is_preapproved(&cmd("sed -n 1,5p file")));
        assert!(!list.is_preapproved(&cmd("sed -i s/a/b/ file")));
        assert!(!list.is_preapproved(&cmd("find . -delete")));
        assert!(!list.is_preapproved(&cmd("find . -exec rm {} +")));
        assert!(list.is_preapproved(&cmd("curl https://example.com")));
        assert!(list.is_preapproved(&cmd("curl -o - https://example.com")));
        assert!(!list.is_preapproved(&cmd("curl -X POST https://example.com")));
        assert!(!list.is_preapproved(&cmd("curl -d x=1 https://example.com")));
        assert!(!list.is_preapproved(&cmd("curl -o page.html https://example.com")));
        assert!(!list.is_preapproved(&cmd("wget -O page.html https://example.com")));
        assert!(list.is_preapproved(&cmd("wget --spider https://example.com")));
        assert!(list.is_preapproved(&cmd("ping -c 2 example.com")));
        assert!(!list.is_preapproved(&cmd("ping -c 10 example.com")));
        assert!(!list.is_preapproved(&cmd("ping example.com")));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = CommandAllowlist::load(&dir.path().join("nope.json")).unwrap();
        assert!(list.entries().is_empty());
    }

    #[test]
    fn load_and_merge_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approved_commands.json");
        std::fs::write(
            &path,
            r#"{"allowlist": [{"name": "cargo", "subcommands": ["check"]}]}"#,
        )
        .unwrap();

        let list = CommandAllowlist::from_config(&[AllowlistEntry::new("ls")], &path);
        assert_eq!(list.entries().len(), 2);
        assert!(list.is_preapproved(&cmd("cargo check")));
        assert!(!list.is_preapproved(&cmd("cargo publish")));
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approved_commands.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            CommandAllowlist::load(&path),
            Err(AllowlistError::Parse { .. })
        ));
    }
}
