//! `openagent chat`: interactive session or single-message mode.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use openagent_agent::{
    AgentSession, EscState, HistoryGovernor, ModelRequestGateway, NO_HUMAN_AUTO_MESSAGE,
    ObservationBuilder, PassExecutorBuilder, RequestSettings, build_system_prompt,
};
use openagent_config::AppConfig;
use openagent_core::event::EventBus;
use openagent_core::model::ModelClient;
use openagent_providers::OpenAiResponsesClient;
use openagent_security::{ApprovalManager, CommandAllowlist, HumanPrompt};
use openagent_tools::ShellRunner;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ChatArgs;
use crate::render::{self, RenderMode};

/// Reads human answers line by line from stdin.
struct StdinPrompt {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    echo_prompt: bool,
}

impl StdinPrompt {
    fn new(echo_prompt: bool) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            echo_prompt,
        }
    }
}

#[async_trait]
impl HumanPrompt for StdinPrompt {
    async fn ask(&self, prompt: &str) -> Option<String> {
        if self.echo_prompt {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
        }
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read from stdin");
                None
            }
        }
    }
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.auto_approve {
        config.commands.auto_approve = true;
    }

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!("    OPENAGENT_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let client: Arc<dyn ModelClient> = Arc::new(OpenAiResponsesClient::from_config(&config)?);
    let events = EventBus::default();
    let mode = if args.json { RenderMode::Json } else { RenderMode::Text };
    let renderer = render::spawn(events.subscribe(), mode);

    let input: Arc<dyn HumanPrompt> = Arc::new(StdinPrompt::new(!args.json));
    let workspace = std::env::current_dir()?;
    let mut session = build_session(&config, client, events.clone(), input, &workspace)
        .with_no_human(args.no_human)
        .with_auto_approve_notice(config.commands.auto_approve);

    let shutdown = CancellationToken::new();
    let interrupts = tokio::spawn(watch_interrupts(session.esc(), shutdown.clone()));

    let result = match args.message {
        Some(message) => {
            tokio::select! {
                result = run_single(&mut session, message) => result,
                _ = shutdown.cancelled() => Ok(()),
            }
        }
        None => {
            tokio::select! {
                _ = session.run() => {}
                _ = shutdown.cancelled() => debug!("Interrupted; ending session"),
            }
            Ok(())
        }
    };

    interrupts.abort();
    drop(session);
    drop(events);
    let _ = renderer.await;

    // A pending stdin read cannot be cancelled and would hold the runtime open
    if shutdown.is_cancelled() {
        std::process::exit(130);
    }
    result.map_err(Into::into)
}

/// Wire the full runtime for one session rooted at `workspace`.
fn build_session(
    config: &AppConfig,
    client: Arc<dyn ModelClient>,
    events: EventBus,
    input: Arc<dyn HumanPrompt>,
    workspace: &Path,
) -> AgentSession {
    let allowlist =
        CommandAllowlist::from_config(&config.commands.allowlist, &config.commands.allowlist_file);
    let approvals = ApprovalManager::new(allowlist)
        .with_auto_approve(config.commands.auto_approve)
        .with_prompt(input.clone());

    let governor = HistoryGovernor::from_config(client.clone(), config);
    let observations =
        ObservationBuilder::new().with_max_output_bytes(config.commands.max_output_bytes);
    let requests = ModelRequestGateway::new(client, events.clone(), RequestSettings::from_config(config))
        .with_observation_builder(observations.clone());

    let system_prompt = build_system_prompt(
        config.system_prompt.as_deref(),
        config.system_prompt_augmentation.as_deref(),
        Some(workspace),
    );

    let executor = PassExecutorBuilder::new(requests, Arc::new(ShellRunner::new()), events.clone())
        .with_approvals(Arc::new(approvals))
        .with_governor(Arc::new(governor))
        .with_observation_builder(observations)
        .with_reminder_message(config.plan.reminder_message.clone())
        .with_default_timeout(config.commands.default_timeout_sec)
        .with_context_window(config.history.context_window)
        .with_virtual_agent(config.virtual_agent.clone())
        .with_system_prompt(system_prompt.clone())
        .build();

    AgentSession::new(executor, system_prompt, events, input)
        .with_reminder_limit(config.plan.reminder_limit)
}

/// One message, then keep going while no-human mode stays on.
async fn run_single(
    session: &mut AgentSession,
    message: String,
) -> Result<(), openagent_core::error::ProviderError> {
    let mut next = Some(message);
    while let Some(input) = next.take() {
        session.submit(&input).await?;
        if session.is_no_human() {
            next = Some(NO_HUMAN_AUTO_MESSAGE.to_string());
        }
    }
    Ok(())
}

/// Ctrl-C cancels the in-flight request when one is armed, otherwise quits.
async fn watch_interrupts(esc: EscState, shutdown: CancellationToken) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Unable to listen for Ctrl-C");
            return;
        }
        if esc.is_armed() {
            esc.trigger(Some(serde_json::json!("ctrl-c")));
        } else {
            shutdown.cancel();
            return;
        }
    }
}
