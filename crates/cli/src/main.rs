//! thinkloop CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default config file
//! - `run`: Run an agent on a single request
//! - `chat`: Talk to an agent interactively
//! - `tools`: List the built-in tools
//! - `agents`: List the configured agents
//! - `config`: Show, validate or locate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "thinkloop",
    about = "thinkloop — tool-using LLM agents in a think/act/observe loop",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create ~/.thinkloop/config.toml with defaults
    Init,

    /// Run an agent on one request and print the result
    Run {
        /// The request for the agent
        input: String,

        /// Agent to run (defaults to "assistant")
        #[arg(short, long)]
        agent: Option<String>,

        /// Wall-clock limit in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Iteration cap for this run
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chat with an agent; memory carries over between messages
    Chat {
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// List the built-in tools
    Tools,

    /// List the configured agents
    Agents,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Run {
            input,
            agent,
            timeout,
            max_iterations,
            json,
        } => commands::run::run(agent, input, timeout, max_iterations, json).await?,
        Commands::Chat { agent } => commands::run::chat(agent).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Agents => commands::agents::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
