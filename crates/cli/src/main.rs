//! cs - synchronize local directories with S3-compatible object storage

mod commands;
mod exit_code;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::alias::AliasCommands;
use commands::sync::SyncArgs;
use cs_core::ConfigManager;
use cs_core::config::Defaults;
use exit_code::ExitCode;
use output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "cs", version, about = "Sync local directories with S3-compatible storage")]
struct Cli {
    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make a destination match a source
    Sync(SyncArgs),

    /// Manage storage aliases
    #[command(subcommand)]
    Alias(AliasCommands),

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn output_defaults() -> Defaults {
    match ConfigManager::new().and_then(|m| m.load()) {
        Ok(config) => config.defaults,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using default output settings");
            Defaults::default()
        }
    }
}

async fn run(cli: Cli) -> ExitCode {
    let output = OutputConfig::resolve(cli.json, cli.no_color, cli.quiet, &output_defaults());

    match cli.command {
        Commands::Sync(args) => commands::sync::execute(args, output).await,
        Commands::Alias(cmd) => commands::alias::execute(cmd, output).await,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "cs", &mut std::io::stdout());
            ExitCode::Success
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = tokio::select! {
        code = run(cli) => code,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            ExitCode::Interrupted
        }
    };

    std::process::exit(code.code());
}
