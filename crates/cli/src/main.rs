//! redline CLI: the main entry point.
//!
//! Commands:
//! - `serve`   : Start the beacon endpoint, operator API and watchdog
//! - `onboard` : Write a default config and create the results directory
//! - `config`  : Validate, show, or locate the configuration
//! - `doctor`  : Diagnose configuration problems

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "redline",
    about = "redline: adversary emulation command and control",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $REDLINE_CONFIG or ~/.redline/config.toml)
    #[arg(short, long, global = true, env = "REDLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the C2 server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize configuration
    Onboard,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration problems
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the configuration
    Validate,
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config_path = cli
        .config
        .unwrap_or_else(redline_config::AppConfig::config_path);

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(&config_path, host, port).await?,
        Commands::Onboard => commands::onboard::run(&config_path).await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate(&config_path).await?,
            ConfigAction::Show => commands::config_cmd::show(&config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(&config_path).await?,
        },
        Commands::Doctor => commands::doctor::run(&config_path).await?,
    }

    Ok(())
}
