//! # crew
//!
//! Command-line front end: wires settings, telemetry, the checkpoint store
//! and the Gemini provider into an [`Orchestrator`].

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crew_core::events::AgentEvent;
use crew_core::ids::ConversationId;
use crew_core::messages::{AgentContent, Message};
use crew_core::tools::ToolDescriptor;
use crew_engine::tools::create_default_registry;
use crew_engine::{AgentRole, Orchestrator, OrchestratorDeps, Personas};
use crew_llm::{GeminiConfig, GeminiProvider, RetryConfig, RetryingProvider};
use crew_settings::CrewSettings;
use crew_store::{CheckpointRepo, Database};
use crew_telemetry::{init_telemetry, parse_level, LogFormat, TelemetryConfig};

/// Multi-agent coding crew.
#[derive(Parser, Debug)]
#[command(name = "crew", about = "Supervisor plus five specialist coding agents")]
struct Cli {
    /// Settings file (defaults to `~/.crew/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Print progress events to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request to the supervisor.
    Invoke {
        /// Conversation to continue; a new one is started when omitted.
        #[arg(long)]
        conversation: Option<String>,

        /// Working directory for file and terminal tools.
        #[arg(long)]
        workdir: Option<PathBuf>,

        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Print the stored messages of a conversation.
    History { conversation: String },
    /// List stored conversations, most recent first.
    List,
    /// Delete a stored conversation.
    Forget { conversation: String },
    /// Print the action set of the supervisor and each agent.
    Tools,
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn telemetry_config(settings: &CrewSettings) -> TelemetryConfig {
    let defaults = TelemetryConfig::default();
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(defaults.log_level),
        module_levels: settings
            .logging
            .modules
            .iter()
            .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
            .collect(),
        format: LogFormat::from_str(&settings.logging.format).unwrap_or(defaults.format),
    }
}

fn retry_config(settings: &CrewSettings) -> RetryConfig {
    RetryConfig {
        max_retries: settings.retry.max_retries,
        base_delay: std::time::Duration::from_millis(settings.retry.base_delay_ms),
        max_delay: std::time::Duration::from_millis(settings.retry.max_delay_ms),
        jitter_factor: settings.retry.jitter_factor,
    }
}

fn open_database(settings: &CrewSettings) -> Result<Database> {
    let path = settings.database_path();
    ensure_parent_dir(&path)?;
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "database opened");
    Ok(db)
}

fn build_orchestrator(settings: CrewSettings, workdir: PathBuf) -> Result<Orchestrator> {
    let api_key = settings.api_key().with_context(|| {
        format!(
            "No API key: set {} in the environment",
            settings.model.api_key_env
        )
    })?;
    let mut gemini = GeminiConfig::new(settings.model.name.clone(), api_key);
    gemini.base_url = settings.model.base_url.clone();
    gemini.idle_timeout = std::time::Duration::from_secs(settings.model.stream_idle_timeout_secs);
    let provider = GeminiProvider::new(gemini).context("Failed to create Gemini provider")?;
    let provider = RetryingProvider::new(provider, retry_config(&settings));

    let personas_path = settings.personas_path();
    let personas = Personas::load(&personas_path)
        .with_context(|| format!("Failed to load personas: {}", personas_path.display()))?;
    let database = open_database(&settings)?;

    Orchestrator::new(OrchestratorDeps {
        provider: Arc::new(provider),
        database,
        personas,
        settings,
        working_directory: workdir,
    })
    .context("Failed to build orchestrator")
}

fn describe_event(event: &AgentEvent) -> Option<String> {
    let line = match event {
        AgentEvent::TurnStart { agent, turn, .. } => format!("[{agent}] turn {turn}"),
        AgentEvent::ActionStart { agent, action, .. } => format!("[{agent}] -> {action}"),
        AgentEvent::ActionEnd {
            agent,
            action,
            success,
            error_kind,
            duration_ms,
            ..
        } => match error_kind {
            Some(kind) if !success => format!("[{agent}] <- {action} failed ({kind}, {duration_ms}ms)"),
            _ => format!("[{agent}] <- {action} ({duration_ms}ms)"),
        },
        AgentEvent::ArtifactUpdated { agent, slot, .. } => format!("[{agent}] artifact {slot} updated"),
        AgentEvent::AgentComplete { agent, turns, .. } => format!("[{agent}] done after {turns} turns"),
        AgentEvent::TextDelta { .. } => return None,
    };
    Some(line)
}

fn spawn_progress_printer(mut rx: broadcast::Receiver<AgentEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    tracing::trace!(
                        event = event.event_type(),
                        agent = event.agent(),
                        run_id = %event.run_id(),
                        "progress event"
                    );
                    if let Some(line) = describe_event(&event) {
                        eprintln!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("... {n} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_message(message: &Message) {
    match message {
        Message::User(user) => println!("user: {}", user.text),
        Message::Agent(agent) => {
            for part in &agent.content {
                match part {
                    AgentContent::Text { text } => println!("agent: {text}"),
                    AgentContent::ActionRequest(request) => {
                        println!("agent -> {} {}", request.name, request.arguments);
                    }
                }
            }
        }
        Message::ActionResult(result) => {
            let status = if result.success { "ok" } else { "failed" };
            println!("{} [{status}]: {}", result.action, result.render());
        }
    }
}

fn print_descriptors<'a>(title: &str, descriptors: impl IntoIterator<Item = &'a ToolDescriptor>) {
    println!("{title}:");
    for d in descriptors {
        let args: Vec<String> = d
            .args
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect();
        println!("  {}({}) - {}", d.name, args.join(", "), d.description);
    }
}

async fn run_invoke(
    settings: CrewSettings,
    verbose: bool,
    conversation: Option<String>,
    workdir: Option<PathBuf>,
    text: Vec<String>,
) -> Result<()> {
    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let orchestrator = build_orchestrator(settings, workdir)?;
    if verbose {
        spawn_progress_printer(orchestrator.subscribe());
    }

    let id = match conversation {
        Some(raw) => ConversationId::from_raw(raw),
        None => ConversationId::new(),
    };
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator
        .invoke_with_cancel(&id, &text.join(" "), &cancel)
        .await
        .with_context(|| format!("Invocation failed for {id}"))?;

    println!("conversation: {id}");
    println!("turns: {}", outcome.turns);
    println!(
        "tokens: {} in / {} out",
        outcome.usage.total_input_tokens, outcome.usage.total_output_tokens
    );
    for (slot, value) in outcome.artifacts.filled() {
        println!("\n== {slot} ==\n{value}");
    }
    println!("\n{}", outcome.final_text);
    Ok(())
}

fn run_tools() -> Result<()> {
    let registry = create_default_registry().context("Failed to build tool registry")?;
    println!("supervisor:");
    for role in AgentRole::ALL {
        println!(
            "  {}({}) - delegates to {role}, fills {}",
            role.delegate_action(),
            role.arg_name(),
            role.slot()
        );
    }
    for role in AgentRole::ALL {
        let subset = registry
            .subset(role.tool_names())
            .with_context(|| format!("Bad tool set for {role}"))?;
        print_descriptors(role.name(), subset.descriptors());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => crew_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => crew_settings::load_settings().context("Failed to load settings")?,
    };
    let _ = init_telemetry(telemetry_config(&settings));

    match cli.command {
        Command::Invoke {
            conversation,
            workdir,
            text,
        } => run_invoke(settings, cli.verbose, conversation, workdir, text).await,
        Command::History { conversation } => {
            let repo = CheckpointRepo::new(open_database(&settings)?);
            let id = ConversationId::from_raw(conversation);
            let state = repo
                .load(&id)?
                .with_context(|| format!("No conversation named {id}"))?;
            for message in state.messages() {
                print_message(message);
            }
            Ok(())
        }
        Command::List => {
            let repo = CheckpointRepo::new(open_database(&settings)?);
            for row in repo.list()? {
                println!(
                    "{}  messages={} turns={} updated={}",
                    row.conversation_id, row.message_count, row.turn_count, row.updated_at
                );
            }
            Ok(())
        }
        Command::Forget { conversation } => {
            let repo = CheckpointRepo::new(open_database(&settings)?);
            let id = ConversationId::from_raw(conversation);
            if repo.delete(&id)? {
                println!("forgot {id}");
            } else {
                println!("no conversation named {id}");
            }
            Ok(())
        }
        Command::Tools => run_tools(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_collects_trailing_text() {
        let cli = Cli::try_parse_from([
            "crew",
            "invoke",
            "--conversation",
            "conv_demo",
            "build",
            "a",
            "cli",
        ])
        .unwrap();
        let Command::Invoke { conversation, workdir, text } = cli.command else {
            panic!("expected invoke");
        };
        assert_eq!(conversation.as_deref(), Some("conv_demo"));
        assert_eq!(text, vec!["build", "a", "cli"]);
        assert!(workdir.is_none());
    }

    #[test]
    fn invoke_requires_text() {
        assert!(Cli::try_parse_from(["crew", "invoke"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["crew", "list", "--verbose", "--settings", "/tmp/s.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn history_and_forget_take_an_id() {
        let cli = Cli::try_parse_from(["crew", "history", "conv_1"]).unwrap();
        assert!(matches!(cli.command, Command::History { conversation } if conversation == "conv_1"));
        assert!(Cli::try_parse_from(["crew", "forget"]).is_err());
    }

    #[test]
    fn telemetry_from_logging_settings() {
        let mut settings = CrewSettings::default();
        settings.logging.level = "debug".into();
        settings.logging.format = "json".into();
        settings.logging.modules.insert("crew_llm".into(), "trace".into());
        settings.logging.modules.insert("bogus".into(), "loud".into());

        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.module_levels, vec![("crew_llm".to_string(), tracing::Level::TRACE)]);
    }

    #[test]
    fn progress_lines_skip_text_deltas() {
        let run_id = crew_core::ids::RunId::new();
        let delta = AgentEvent::TextDelta {
            run_id: run_id.clone(),
            agent: "writer".into(),
            delta: "x".into(),
        };
        assert!(describe_event(&delta).is_none());
        let done = AgentEvent::AgentComplete {
            run_id,
            agent: "writer".into(),
            turns: 2,
        };
        assert_eq!(describe_event(&done).as_deref(), Some("[writer] done after 2 turns"));
    }
}
