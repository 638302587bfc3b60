mod api;
mod client;
mod cluster;
mod commands;
mod config;
mod domain;
mod exec;
mod releases;
mod server;

use clap::{Parser, Subcommand};

use commands::plan::PlanTarget;
use commands::updates::{OutputFormat, StartCommands};

#[derive(Parser)]
#[command(
    name = "rollout",
    version,
    about = "Rolling OS package and cluster-runtime upgrades, one node at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rollout daemon (REST + GraphQL)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,

        /// Path to config file (default: ~/.config/rollout/config.yaml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Show the daemon's current operation state
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Check every node for OS package and runtime updates
    Check {
        #[command(flatten)]
        target: Target,
    },

    /// Start a rolling operation
    Start {
        #[command(flatten)]
        target: Target,

        #[command(subcommand)]
        command: StartCommands,
    },

    /// Clear a finished or failed operation back to idle
    Reset {
        #[command(flatten)]
        target: Target,
    },

    /// Preview the node order of an operation (talks to the cluster directly)
    Plan {
        /// Operation to plan
        #[arg(value_enum)]
        operation: PlanTarget,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Path to config file (default: ~/.config/rollout/config.yaml)
        #[arg(long)]
        config: Option<String>,
    },
}

/// Daemon connection and output options shared by client subcommands.
#[derive(clap::Args)]
struct Target {
    /// Daemon base URL
    #[arg(long, global = true, default_value = client::DEFAULT_BASE_URL)]
    url: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Daemon { .. }) {
        commands::init_cli_logging();
    }

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
            config,
        } => commands::daemon::run(http_addr, log_level, config),
        Commands::Status { target } => commands::updates::status(&target.url, target.format),
        Commands::Check { target } => commands::updates::check(&target.url, target.format),
        Commands::Start { target, command } => {
            commands::updates::start(&target.url, &command, target.format)
        }
        Commands::Reset { target } => commands::updates::reset(&target.url),
        Commands::Plan {
            operation,
            format,
            config,
        } => commands::plan::run(operation, format, config.as_deref()),
    }
}
