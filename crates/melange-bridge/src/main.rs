//! Melange bridge - module evaluation server for build and preview tools.
//!
//! `serve` binds the bridge socket and answers module requests until
//! interrupted. `eval` sends one request to a running bridge and prints the
//! decoded value.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melange_core::{
    BridgeClient, BridgeConfig, BridgeServer, ErrorPolicy, EvaluationMode, EvaluationResponder,
    LoaderConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "melange-bridge")]
#[command(about = "Re-evaluates modules on demand over a local socket")]
struct Args {
    /// Socket path to bind (serve) or connect to (eval); overrides MELANGE_SOCKET
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// JSON config file; command-line flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge server
    Serve(ServeArgs),
    /// Evaluate one module through a running bridge
    Eval(EvalArgs),
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Where evaluation runs: inline or isolated
    #[arg(long)]
    mode: Option<EvaluationMode>,

    /// What failed requests produce: silent or report
    #[arg(long)]
    error_policy: Option<ErrorPolicy>,

    /// Base directory for JSON modules
    #[arg(long, conflicts_with = "program")]
    root: Option<PathBuf>,

    /// Host program that evaluates modules (identifier passed as last argument)
    #[arg(long)]
    program: Option<String>,

    /// Argument for the host program, placed before the identifier (repeatable)
    #[arg(long = "arg", requires = "program", allow_hyphen_values = true)]
    program_args: Vec<String>,

    /// Maximum number of cached module values
    #[arg(long)]
    cache_capacity: Option<u64>,

    /// Largest accepted frame in bytes
    #[arg(long)]
    max_frame_size: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct EvalArgs {
    /// Module identifier to evaluate
    identifier: String,

    /// Error policy the bridge runs with
    #[arg(long)]
    error_policy: Option<ErrorPolicy>,

    /// Response timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    match &args.command {
        Command::Serve(serve) => run_serve(&args, serve).await,
        Command::Eval(eval) => run_eval(&args, eval).await,
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries the endpoint line and eval output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Merge the config file (if any) with the environment and command-line
/// overrides, in that order.
fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    config.apply_env();
    if let Some(socket) = &args.socket {
        config.socket_path = socket.clone();
    }
    Ok(config)
}

fn apply_serve_args(config: &mut BridgeConfig, serve: &ServeArgs) {
    if let Some(mode) = serve.mode {
        config.evaluation_mode = mode;
    }
    if let Some(policy) = serve.error_policy {
        config.error_policy = policy;
    }
    if let Some(capacity) = serve.cache_capacity {
        config.cache_capacity = Some(capacity);
    }
    if let Some(size) = serve.max_frame_size {
        config.max_frame_size = size;
    }
    if let Some(program) = &serve.program {
        config.loader = LoaderConfig::Command {
            program: program.clone(),
            args: serve.program_args.clone(),
            working_dir: None,
        };
    } else if let Some(root) = &serve.root {
        config.loader = LoaderConfig::Json {
            root: Some(root.clone()),
        };
    }
}

async fn run_serve(args: &Args, serve: &ServeArgs) -> Result<()> {
    let mut config = load_config(args)?;
    apply_serve_args(&mut config, serve);
    config.validate()?;

    info!("Starting Melange bridge");

    let responder = Arc::new(EvaluationResponder::from_config(&config));
    let mut handle = BridgeServer::start(&config, responder).await?;

    // Print the endpoint for the build tool (intentional stdout for IPC)
    println!("{}={}", BridgeConfig::SOCKET_PATH_ENV, handle.path().display());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

async fn run_eval(args: &Args, eval: &EvalArgs) -> Result<()> {
    let config = load_config(args)?;
    let policy = eval.error_policy.unwrap_or(config.error_policy);

    let client = BridgeClient::connect(&config.socket_path)
        .await?
        .with_error_policy(policy)
        .with_response_timeout(Duration::from_millis(eval.timeout_ms));

    let value = client
        .evaluate(&eval.identifier)
        .await
        .with_context(|| format!("Evaluating {} failed", eval.identifier))?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    Ok(())
}
