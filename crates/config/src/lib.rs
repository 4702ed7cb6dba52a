//! Configuration loading, validation, and management for OpenAgent.
//!
//! Loads configuration from `~/.openagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.openagent/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the Responses-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Transport-level retries handed to the model client
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request wall-clock timeout in milliseconds (none = no deadline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Replace the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Appended to the system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_augmentation: Option<String>,

    /// History growth safety nets
    #[serde(default)]
    pub history: HistoryConfig,

    /// Command execution and approval
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Plan reminders
    #[serde(default)]
    pub plan: PlanConfig,

    /// Nested sub-agent budget
    #[serde(default)]
    pub virtual_agent: VirtualAgentConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-5-codex".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("history", &self.history)
            .field("commands", &self.commands)
            .field("plan", &self.plan)
            .field("virtual_agent", &self.virtual_agent)
            .finish()
    }
}

/// Compaction, amnesia, dementia, and payload-growth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub compaction_enabled: bool,

    /// Compact once used/total context exceeds this ratio
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Override the model's context window (tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    #[serde(default = "default_true")]
    pub amnesia_enabled: bool,

    /// Entries older than this many passes lose their plan payloads
    #[serde(default = "default_amnesia_threshold")]
    pub amnesia_threshold: u32,

    /// Entries older than this many passes are dropped entirely (0 = off)
    #[serde(default = "default_dementia_limit")]
    pub dementia_limit: u32,

    #[serde(default = "default_true")]
    pub payload_guard_enabled: bool,

    /// Abort when a request grows by at least this factor...
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    /// ...and by more than this many bytes
    #[serde(default = "default_min_growth_bytes")]
    pub min_growth_bytes: usize,

    /// Where failsafe history dumps go, relative to the working directory
    #[serde(default = "default_failsafe_dir")]
    pub failsafe_dir: PathBuf,
}

fn default_compaction_threshold() -> f64 {
    0.5
}
fn default_amnesia_threshold() -> u32 {
    10
}
fn default_dementia_limit() -> u32 {
    30
}
fn default_growth_factor() -> f64 {
    2.0
}
fn default_min_growth_bytes() -> usize {
    1024
}
fn default_failsafe_dir() -> PathBuf {
    PathBuf::from(".openagent").join("failsafe-history")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            compaction_enabled: true,
            compaction_threshold: default_compaction_threshold(),
            context_window: None,
            amnesia_enabled: true,
            amnesia_threshold: default_amnesia_threshold(),
            dementia_limit: default_dementia_limit(),
            payload_guard_enabled: true,
            growth_factor: default_growth_factor(),
            min_growth_bytes: default_min_growth_bytes(),
            failsafe_dir: default_failsafe_dir(),
        }
    }
}

/// One pre-approved command: a base name and, optionally, its allowed
/// subcommands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcommands: Vec<String>,
}

impl AllowlistEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subcommands: Vec::new(),
        }
    }
}

/// Command execution and approval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Run every command without asking
    #[serde(default)]
    pub auto_approve: bool,

    /// Timeout when the model does not specify `timeout_sec`
    #[serde(default = "default_command_timeout")]
    pub default_timeout_sec: u64,

    /// Combined stdout+stderr above this is replaced by a corruption marker
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Extra allowlist file (JSON `{"allowlist": [...]}`), relative to the
    /// working directory
    #[serde(default = "default_allowlist_file")]
    pub allowlist_file: PathBuf,

    /// Commands that never need a human decision
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<AllowlistEntry>,
}

fn default_command_timeout() -> u64 {
    60
}
fn default_max_output_bytes() -> usize {
    50 * 1024
}
fn default_allowlist() -> Vec<AllowlistEntry> {
    ["ls", "cat", "pwd", "head", "tail", "wc", "grep", "rg", "find", "sed"]
        .into_iter()
        .map(AllowlistEntry::new)
        .chain(std::iter::once(AllowlistEntry {
            name: "git".into(),
            subcommands: vec!["status".into(), "diff".into(), "log".into(), "show".into()],
        }))
        .collect()
}
fn default_allowlist_file() -> PathBuf {
    PathBuf::from("approved_commands.json")
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            default_timeout_sec: default_command_timeout(),
            max_output_bytes: default_max_output_bytes(),
            allowlist: default_allowlist(),
            allowlist_file: default_allowlist_file(),
        }
    }
}

/// Plan reminder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Consecutive reminders before the runtime yields back to the human
    #[serde(default = "default_reminder_limit")]
    pub reminder_limit: u32,

    /// Auto-response used for reminders
    #[serde(default = "default_reminder_message")]
    pub reminder_message: String,
}

fn default_reminder_limit() -> u32 {
    3
}
fn default_reminder_message() -> String {
    "The plan is not completed, either send a command to continue, update the plan, take a deep breath and reanalyze the situation, add/remove steps or sub-steps, or abandon the plan if we don't know how to continue".into()
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            reminder_limit: default_reminder_limit(),
            reminder_message: default_reminder_message(),
        }
    }
}

/// Budget for `shell: "openagent"` sub-agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualAgentConfig {
    /// Passes granted when the command does not ask for a number
    #[serde(default = "default_virtual_passes")]
    pub default_max_passes: u32,

    /// Hard ceiling on requested passes
    #[serde(default = "default_virtual_cap")]
    pub max_passes_cap: u32,

    /// How many sub-agents may nest inside each other
    #[serde(default = "default_virtual_depth")]
    pub max_depth: u32,
}

fn default_virtual_passes() -> u32 {
    3
}
fn default_virtual_cap() -> u32 {
    10
}
fn default_virtual_depth() -> u32 {
    2
}

impl Default for VirtualAgentConfig {
    fn default() -> Self {
        Self {
            default_max_passes: default_virtual_passes(),
            max_passes_cap: default_virtual_cap(),
            max_depth: default_virtual_depth(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.openagent/config.toml).
    ///
    /// Also checks environment variables:
    /// - `OPENAGENT_API_KEY`, then `OPENAI_API_KEY`
    /// - `OPENAGENT_MODEL`, then `OPENAI_MODEL`
    /// - `OPENAI_BASE_URL`, `OPENAI_TIMEOUT_MS`, `OPENAI_MAX_RETRIES`,
    ///   `OPENAI_CONTEXT_WINDOW`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("OPENAGENT_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("OPENAGENT_MODEL").or_else(|| lookup("OPENAI_MODEL")) {
            self.model = model;
        }

        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.base_url = url;
        }

        if let Some(ms) = lookup("OPENAI_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.request_timeout_ms = Some(ms).filter(|ms| *ms > 0);
        }

        if let Some(retries) =
            lookup("OPENAI_MAX_RETRIES").and_then(|v| v.trim().parse::<u32>().ok())
        {
            self.max_retries = retries;
        }

        if let Some(window) =
            lookup("OPENAI_CONTEXT_WINDOW").and_then(|v| v.trim().parse::<usize>().ok())
        {
            self.history.context_window = Some(window).filter(|w| *w > 0);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".openagent")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.history.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "history.compaction_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if !(self.history.growth_factor > 1.0) {
            return Err(ConfigError::ValidationError(
                "history.growth_factor must be greater than 1.0".into(),
            ));
        }

        if self.history.amnesia_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "history.amnesia_threshold must be at least 1".into(),
            ));
        }

        let va = &self.virtual_agent;
        if va.max_passes_cap == 0 || va.default_max_passes == 0 {
            return Err(ConfigError::ValidationError(
                "virtual_agent pass budgets must be at least 1".into(),
            ));
        }
        if va.default_max_passes > va.max_passes_cap {
            return Err(ConfigError::ValidationError(
                "virtual_agent.default_max_passes must not exceed max_passes_cap".into(),
            ));
        }

        if self.commands.default_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "commands.default_timeout_sec must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_retries: default_max_retries(),
            request_timeout_ms: None,
            system_prompt: None,
            system_prompt_augmentation: None,
            history: HistoryConfig::default(),
            commands: CommandsConfig::default(),
            plan: PlanConfig::default(),
            virtual_agent: VirtualAgentConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.compaction_threshold, 0.5);
        assert_eq!(config.history.amnesia_threshold, 10);
        assert_eq!(config.history.min_growth_bytes, 1024);
        assert_eq!(config.virtual_agent.default_max_passes, 3);
        assert_eq!(config.plan.reminder_limit, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.commands.allowlist, config.commands.allowlist);
    }

    #[test]
    fn invalid_compaction_threshold_rejected() {
        let mut config = AppConfig::default();
        config.history.compaction_threshold = 1.5;
        assert!(config.validate().is_err());
        config.history.compaction_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn growth_factor_must_exceed_one() {
        let mut config = AppConfig::default();
        config.history.growth_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn virtual_budget_must_fit_cap() {
        let mut config = AppConfig::default();
        config.virtual_agent.default_max_passes = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().model, "gpt-5-codex");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4.1"

[history]
amnesia_threshold = 4

[[commands.allowlist]]
name = "npm"
subcommands = ["test"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.history.amnesia_threshold, 4);
        assert_eq!(config.history.compaction_threshold, 0.5);
        assert_eq!(config.commands.allowlist.len(), 1);
        assert_eq!(config.commands.allowlist[0].subcommands, vec!["test"]);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OPENAI_TIMEOUT_MS", "1500"),
            ("OPENAI_CONTEXT_WINDOW", "64000"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.request_timeout_ms, Some(1500));
        assert_eq!(config.history.context_window, Some(64000));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
