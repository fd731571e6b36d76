//! stylemail - style-aware email drafting.
//!
//! Seeds a per-user writing style from sample texts and drafts emails in that
//! style. The work is done by a pluggable backend: by default an external
//! engine invoked once per call, optionally an in-process OpenAI engine.
//! Calls run in-process or through a long-lived daemon.

mod backend;
mod client;
mod config;
mod daemon;
mod error;
mod protocol;

use anyhow::{Context, Result};
use backend::{create_backend, dispatch};
use clap::{Parser, Subcommand, ValueEnum};
use config::{BackendConfig, Config};
use protocol::{EmailDraft, Reply, Request};
use std::process::Command as ProcessCommand;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stylemail")]
#[command(author, version, about = "Draft emails in a user's own writing style")]
struct Cli {
    /// Print only the reply text (for scripting)
    #[arg(long, global = true)]
    pipe: bool,

    /// Send the request through the running daemon
    #[arg(long, global = true)]
    daemon: bool,

    /// Override the configured backend
    #[arg(long, global = true, value_enum, value_name = "KIND")]
    backend: Option<BackendKind>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record writing samples for a user
    Seed {
        user_id: String,
        /// Sample texts representative of the user's style
        samples: Vec<String>,
    },
    /// Draft an email in a user's style
    Generate {
        user_id: String,
        /// What the email should say (prompted for when omitted)
        prompt: Vec<String>,
    },
    /// Summarize a list of nudges
    Nudge {
        user_id: String,
        prompt: String,
        /// Nudges as text or JSON objects with title/instructions/metrics
        nudges: Vec<String>,
    },
    /// Draft an email addressing a list of nudges
    NudgeEmail {
        user_id: String,
        prompt: String,
        nudges: Vec<String>,
    },
    /// Drop everything stored for a user (native backend only; runs in-process even with --daemon)
    Forget { user_id: String },
    /// Manage the stylemail daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Open configuration file in $EDITOR
    Config,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in the background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Run the daemon in the foreground (for debugging)
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Process,
    Openai,
}

impl BackendKind {
    /// Swap the backend section for this kind, keeping it if it already matches.
    fn apply(self, config: &mut Config) {
        let matches = matches!(
            (self, &config.backend),
            (BackendKind::Process, BackendConfig::Process { .. })
                | (BackendKind::Openai, BackendConfig::OpenAI { .. })
        );
        if matches {
            return;
        }
        config.backend = match self {
            BackendKind::Process => BackendConfig::default(),
            BackendKind::Openai => BackendConfig::openai_default(),
        };
    }

    fn as_arg(self) -> &'static str {
        match self {
            BackendKind::Process => "process",
            BackendKind::Openai => "openai",
        }
    }
}

/// The daemon answers with the backend it was started with, so a per-call
/// override cannot reach it.
fn check_flags(cli: &Cli) -> Result<()> {
    if cli.daemon && cli.backend.is_some() {
        anyhow::bail!(
            "--backend cannot be combined with --daemon; restart the daemon with \
             'stylemail daemon start --backend <KIND>' instead"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let daemon_foreground = matches!(
        cli.command,
        Commands::Daemon {
            action: DaemonAction::Run
        }
    );
    init_logging(cli.verbose, daemon_foreground);
    check_flags(&cli)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(kind) = cli.backend {
        kind.apply(&mut config);
    }

    let output = Output {
        pipe: cli.pipe,
        via_daemon: cli.daemon,
    };

    match cli.command {
        Commands::Seed { user_id, samples } => {
            output.run(&config, Request::Seed { user_id, samples }).await
        }
        Commands::Generate { user_id, prompt } => {
            let Some(prompt) = resolve_prompt(prompt, cli.pipe)? else {
                return Ok(());
            };
            output.run(&config, Request::Generate { user_id, prompt }).await
        }
        Commands::Nudge {
            user_id,
            prompt,
            nudges,
        } => {
            output
                .run(
                    &config,
                    Request::NudgeSummary {
                        user_id,
                        prompt,
                        nudges,
                    },
                )
                .await
        }
        Commands::NudgeEmail {
            user_id,
            prompt,
            nudges,
        } => {
            output
                .run(
                    &config,
                    Request::NudgeEmail {
                        user_id,
                        prompt,
                        nudges,
                    },
                )
                .await
        }
        Commands::Forget { user_id } => forget(&config, &user_id).await,
        Commands::Daemon { action } => handle_daemon(action, config, cli.backend).await,
        Commands::Config => handle_config(),
    }
}

/// Logs go to stderr; stdout carries only replies.
fn init_logging(verbose: bool, daemon_foreground: bool) {
    let default = if verbose {
        "stylemail=debug"
    } else if daemon_foreground {
        "stylemail=info"
    } else {
        "stylemail=warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},reqwest=warn", default)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Join prompt words, or ask for a prompt in the TUI when none was given.
fn resolve_prompt(words: Vec<String>, pipe_mode: bool) -> Result<Option<String>> {
    if !words.is_empty() {
        return Ok(Some(words.join(" ")));
    }
    if pipe_mode || !atty::is(atty::Stream::Stdin) {
        return Err(anyhow::anyhow!("A prompt is required when not running interactively"));
    }
    match client::run_tui("stylemail: what should the email say?", None)? {
        client::tui::TuiResult::Prompt(prompt) => Ok(Some(prompt)),
        client::tui::TuiResult::Cancelled => Ok(None),
    }
}

/// How a finished call is delivered to the user.
struct Output {
    pipe: bool,
    via_daemon: bool,
}

impl Output {
    async fn run(&self, config: &Config, request: Request) -> Result<()> {
        let result = if self.via_daemon {
            let reply_timeout = config
                .pool
                .timeout_secs
                .map(|secs| Duration::from_secs(secs + 5));
            client::send_request(request.clone(), reply_timeout).await
        } else {
            let backend = create_backend(config)?;
            dispatch(backend.as_ref(), &request)
                .await
                .map_err(anyhow::Error::from)
        };

        match result {
            Ok(reply) => {
                self.print(&request, &reply);
                Ok(())
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    fn print(&self, request: &Request, reply: &Reply) {
        if let Some(code) = reply.exit_code.filter(|code| *code != 0) {
            warn!("engine exited with status {}", code);
        }

        if self.pipe {
            println!("{}", reply.text);
            return;
        }

        match request {
            Request::Seed { user_id, samples } => {
                if reply.text.is_empty() {
                    println!("Seeded style for user '{}' with {} samples.", user_id, samples.len());
                } else {
                    println!("{}", reply.text);
                }
            }
            Request::Generate { .. } => {
                println!("Generated Email:");
                println!("{}", reply.text);
            }
            Request::NudgeSummary { .. } => {
                println!("Generated Nudge Summary:");
                println!("{}", reply.text);
            }
            Request::NudgeEmail { .. } => {
                let draft = EmailDraft::parse(&reply.text);
                println!("Generated Nudge Email:");
                println!("Subject: {}", draft.subject);
                println!("Body:\n{}", draft.body);
            }
        }
    }
}

async fn forget(config: &Config, user_id: &str) -> Result<()> {
    let backend = create_backend(config)?;
    let reply = backend.forget(user_id).await?;
    println!("{}", reply.text);
    Ok(())
}

/// Handle daemon subcommands.
async fn handle_daemon(
    action: DaemonAction,
    config: Config,
    backend: Option<BackendKind>,
) -> Result<()> {
    match action {
        DaemonAction::Start => start_daemon(backend).await,
        DaemonAction::Stop => stop_daemon().await,
        DaemonAction::Status => daemon_status(&config).await,
        DaemonAction::Run => run_daemon_foreground(config).await,
    }
}

/// Start the daemon in the background.
/// Note: All output goes to stderr to avoid polluting stdout.
async fn start_daemon(backend: Option<BackendKind>) -> Result<()> {
    if daemon::server::is_daemon_running().await {
        eprintln!("Daemon is already running");
        return Ok(());
    }

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut command = ProcessCommand::new(&exe);
    command.args(["daemon", "run"]);
    if let Some(kind) = backend {
        command.args(["--backend", kind.as_arg()]);
    }
    let child = command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to start daemon process")?;

    eprintln!("Starting daemon (PID {})...", child.id());

    let max_wait = 3000; // 3 seconds max
    let poll_interval = 100;
    let mut waited = 0;

    while waited < max_wait {
        tokio::time::sleep(Duration::from_millis(poll_interval)).await;
        waited += poll_interval;

        if daemon::server::is_daemon_running().await {
            eprintln!("Daemon is ready");
            return Ok(());
        }
    }

    eprintln!("\nDaemon startup timed out. Run 'stylemail daemon run' to see errors.");
    std::process::exit(1);
}

/// Stop the running daemon.
async fn stop_daemon() -> Result<()> {
    if !daemon::server::is_daemon_running().await {
        println!("Daemon is not running");
        return Ok(());
    }

    daemon::server::stop_daemon().await?;
    println!("Daemon stopped");
    Ok(())
}

/// Show daemon status.
async fn daemon_status(config: &Config) -> Result<()> {
    if daemon::server::is_daemon_running().await {
        println!("Daemon: running");
        if let Some(pid) = daemon::server::get_daemon_pid().await {
            println!("PID: {}", pid);
        }
        println!("Backend: {}", config.backend_type());
        println!("Max concurrency: {}", config.pool.max_concurrency);
        println!("Socket: {}", Config::socket_path()?.display());
    } else {
        println!("Daemon: not running");
        println!("Start with: stylemail daemon start");
    }
    Ok(())
}

/// Run the daemon in the foreground.
async fn run_daemon_foreground(config: Config) -> Result<()> {
    info!("Starting stylemail daemon...");
    info!(
        "Using backend: {} (max {} concurrent runs)",
        config.backend_type(),
        config.pool.max_concurrency
    );

    let server = daemon::DaemonServer::new(config)?;
    server.run().await
}

/// Handle the config command.
fn handle_config() -> Result<()> {
    let config_path = Config::config_path()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !config_path.exists() {
        Config::default().save()?;
        println!("Created default config at {}", config_path.display());
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = ProcessCommand::new(&editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        eprintln!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_seed() {
        let cli = Cli::try_parse_from([
            "stylemail",
            "seed",
            "alice",
            "Hi there, best regards",
            "Thanks, talk soon",
        ])
        .unwrap();
        match cli.command {
            Commands::Seed { user_id, samples } => {
                assert_eq!(user_id, "alice");
                assert_eq!(samples, vec!["Hi there, best regards", "Thanks, talk soon"]);
            }
            _ => panic!("expected seed"),
        }
    }

    #[test]
    fn test_cli_parses_generate_with_globals() {
        let cli = Cli::try_parse_from([
            "stylemail",
            "generate",
            "bob",
            "write",
            "a",
            "follow-up",
            "--pipe",
            "--backend",
            "openai",
        ])
        .unwrap();
        assert!(cli.pipe);
        assert!(matches!(cli.backend, Some(BackendKind::Openai)));
        match cli.command {
            Commands::Generate { prompt, .. } => {
                assert_eq!(resolve_prompt(prompt, true).unwrap().unwrap(), "write a follow-up")
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_missing_prompt_in_pipe_mode_fails() {
        assert!(resolve_prompt(vec![], true).is_err());
    }

    #[test]
    fn test_backend_override_rejected_with_daemon() {
        let cli = Cli::try_parse_from([
            "stylemail", "--daemon", "--backend", "openai", "generate", "bob", "hi",
        ])
        .unwrap();
        let err = check_flags(&cli).unwrap_err();
        assert!(err.to_string().contains("--backend cannot be combined with --daemon"));
    }

    #[test]
    fn test_backend_override_allowed_in_process() {
        let cli = Cli::try_parse_from(["stylemail", "--backend", "openai", "forget", "bob"]).unwrap();
        assert!(check_flags(&cli).is_ok());
        let cli = Cli::try_parse_from(["stylemail", "--daemon", "generate", "bob", "hi"]).unwrap();
        assert!(check_flags(&cli).is_ok());
    }

    #[test]
    fn test_backend_kind_round_trips_as_flag() {
        for kind in [BackendKind::Process, BackendKind::Openai] {
            let cli = Cli::try_parse_from(["stylemail", "--backend", kind.as_arg(), "daemon", "run"])
                .unwrap();
            assert_eq!(cli.backend.map(BackendKind::as_arg), Some(kind.as_arg()));
        }
    }

    #[test]
    fn test_backend_override() {
        let mut config = Config::default();
        BackendKind::Openai.apply(&mut config);
        assert_eq!(config.backend_type(), "openai");
        BackendKind::Process.apply(&mut config);
        assert_eq!(config.backend_type(), "process");
    }
}
