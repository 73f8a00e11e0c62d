use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::api::{AppState, create_router};
use tether::cache::MemoryCache;
use tether::config::AppConfig;
use tether::events::{AgentEvent, ContentBlock, RunSummary, decode_line};
use tether::run::{RunService, RunStatus, StartRunRequest};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose, cli.common.quiet)?;

    let config = AppConfig::load(cli.common.config.as_deref())?;

    match cli.command {
        Command::Serve(cmd) => serve_main(config, cmd),
        Command::Run(cmd) => run_main(config, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Tether - AI CLI run orchestration and streaming relay server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve(ServeCommand),
    /// Execute a single run in the foreground and print its summary
    Run(RunCommand),
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the bind address
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Args)]
struct RunCommand {
    /// Prompt for the agent
    prompt: String,
    /// Workspace name under the configured root
    #[arg(short, long)]
    workspace: String,
    /// Model to use
    #[arg(long)]
    model: Option<String>,
    /// Resume a prior session by id
    #[arg(long)]
    resume: Option<String>,
    /// Stream partial text as it is generated
    #[arg(long)]
    partials: bool,
    /// Print raw NDJSON lines instead of extracted text
    #[arg(long)]
    raw: bool,
}

fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn serve_main(config: AppConfig, cmd: ServeCommand) -> Result<()> {
    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);

    tokio::fs::create_dir_all(&config.runner.logs_dir)
        .await
        .context("creating runs log directory")?;

    let cache = Arc::new(MemoryCache::new());
    let state = AppState::new(&config, cache);
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        addr = %addr,
        workspace_root = %config.runner.workspace_root.display(),
        "tether listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[tokio::main]
async fn run_main(config: AppConfig, cmd: RunCommand) -> Result<()> {
    let cache = Arc::new(MemoryCache::new());
    let service = RunService::new(&config.runner, cache);

    let mut request = StartRunRequest {
        prompt: cmd.prompt,
        workspace: cmd.workspace,
        stream_token: None,
        config: Default::default(),
    };
    request.config.model = cmd
        .model
        .unwrap_or_else(|| config.runner.default_model.clone());
    request.config.resume_session_id = cmd.resume;
    request.config.include_partials = cmd.partials;

    let mut started = service.start_run("local", request).await?;
    info!(run_id = %started.run_id, "run started");

    let mut stdout = io::stdout();
    while let Some(line) = started.lines.recv().await {
        if cmd.raw {
            println!("{line}");
            continue;
        }
        match decode_line(&line) {
            Some(AgentEvent::StreamEvent(delta)) if cmd.partials => {
                if let Some(fragment) = delta.text_fragment() {
                    print!("{fragment}");
                    let _ = stdout.flush();
                }
            }
            Some(AgentEvent::Assistant(event)) if !cmd.partials && !event.is_sidechain => {
                for block in &event.message.content {
                    if let ContentBlock::Text { text } = block {
                        println!("{text}");
                    }
                }
            }
            _ => {}
        }
    }
    if cmd.partials && !cmd.raw {
        println!();
    }

    let view = service.status("local", &started.run_id).await?;
    if let Some(summary) = &view.summary {
        print_summary(summary);
    }

    match view.status {
        RunStatus::Completed => Ok(()),
        status => {
            let message = view.message.unwrap_or_default();
            bail!("run {status}: {message}");
        }
    }
}

fn print_summary(summary: &RunSummary) {
    eprintln!();
    if let Some(model) = &summary.model {
        eprintln!("model:    {model}");
    }
    eprintln!("turns:    {}", summary.num_turns);
    eprintln!(
        "tokens:   {} in / {} out (cache: {} read, {} created)",
        summary.input_tokens,
        summary.output_tokens,
        summary.cache_read_tokens,
        summary.cache_creation_tokens
    );
    if let Some(window) = summary.context_window {
        eprintln!("context:  {} / {}", summary.input_tokens, window);
    }
    if let Some(duration) = summary.duration_ms {
        eprintln!("duration: {:.1}s", duration as f64 / 1000.0);
    }
    if !summary.tool_calls.is_empty() {
        eprintln!("tools:");
        for call in &summary.tool_calls {
            eprintln!("  - {call}");
        }
    }
    if let Some(session_id) = &summary.session_id {
        eprintln!("session:  {session_id}");
    }
}
