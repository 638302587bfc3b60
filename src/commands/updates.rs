//! `rollout status|check|start|reset` — drive a rollout daemon via its REST API.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};

use crate::client::RolloutClient;
use crate::domain::types::{
    LogLevel, NodeStatus, OperationState, OperationStatus, StepStatus,
};

/// How many log lines the table view shows.
const TABLE_LOG_LINES: usize = 10;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum StartCommands {
    /// Rolling OS package upgrade (workers first)
    Os,
    /// Rolling runtime upgrade (control plane first)
    Runtime {
        /// Target runtime release tag, e.g. v1.30.2+k3s1
        #[arg(long = "version", value_name = "VERSION")]
        target_version: String,
    },
}

pub fn status(url: &str, format: OutputFormat) -> Result<()> {
    block_on(async {
        let client = RolloutClient::new(url)?;
        let state = client.status().await?;
        match format {
            OutputFormat::Table => {
                let health = client.health().await?;
                println!(
                    "{} {} (up {}s)",
                    "rollout daemon".bold(),
                    health.version,
                    health.uptime_secs
                );
                print_state(&state);
                Ok(())
            }
            _ => print_output(format, &state),
        }
    })
}

pub fn check(url: &str, format: OutputFormat) -> Result<()> {
    block_on(async {
        let client = RolloutClient::new(url)?;
        println!("Checking for updates on all nodes...");
        let state = client.check().await?;
        match format {
            OutputFormat::Table => {
                print_versions(&state);
                Ok(())
            }
            _ => print_output(format, &state.versions),
        }
    })
}

pub fn start(url: &str, command: &StartCommands, format: OutputFormat) -> Result<()> {
    block_on(async {
        let client = RolloutClient::new(url)?;
        let started = match command {
            StartCommands::Os => client.start_os().await?,
            StartCommands::Runtime { target_version } => {
                client.start_runtime(target_version).await?
            }
        };
        match format {
            OutputFormat::Table => {
                println!(
                    "{} {} started",
                    "ok".green().bold(),
                    started.operation.to_string().bold()
                );
                println!("  order: {}", started.node_order.join(" → "));
                println!("  follow progress with `rollout status`");
                Ok(())
            }
            _ => print_output(format, &started),
        }
    })
}

pub fn reset(url: &str) -> Result<()> {
    block_on(async {
        let client = RolloutClient::new(url)?;
        client.reset().await?;
        println!("{} state reset to idle", "ok".green().bold());
        Ok(())
    })
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

pub(crate) fn print_output<T: serde::Serialize>(format: OutputFormat, data: &T) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
        OutputFormat::Table => println!("{}", serde_json::to_string(data)?),
    }
    Ok(())
}

// ── Table rendering ────────────────────────────────────────

fn print_state(state: &OperationState) {
    let operation = state
        .operation
        .map(|op| format!(" ({op})"))
        .unwrap_or_default();
    println!("  status:   {}{}", operation_status(state.status), operation);
    if let Some(started) = state.started_at {
        println!("  started:  {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed) = state.completed_at {
        println!("  finished: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(err) = &state.error {
        println!("  error:    {}", err.red());
    }

    if !state.node_order.is_empty() {
        println!();
        let header = format!("{:<20} {:<14} {:<12} {}", "NODE", "ROLE", "STATUS", "STEP");
        println!("  {}", header.bold());
        for (i, name) in state.node_order.iter().enumerate() {
            let Some(node) = state.nodes.get(name) else {
                continue;
            };
            let marker = if state.current_node_index == Some(i) { ">" } else { " " };
            let step = node
                .steps
                .iter()
                .find(|s| matches!(s.status, StepStatus::InProgress | StepStatus::Error))
                .map(|s| s.name.as_str())
                .unwrap_or("");
            println!(
                "{} {:<20} {:<14} {} {}",
                marker,
                name,
                node.role.to_string(),
                node_status(node.status),
                step
            );
        }
    }

    print_versions(state);

    if !state.logs.is_empty() {
        println!();
        println!("  {}", "recent logs".bold());
        let skip = state.logs.len().saturating_sub(TABLE_LOG_LINES);
        for entry in state.logs.iter().skip(skip) {
            let node = entry
                .node
                .as_deref()
                .map(|n| format!("[{n}] "))
                .unwrap_or_default();
            let line = format!("{}{}", node, entry.message);
            let line = match entry.level {
                LogLevel::Info => line.normal(),
                LogLevel::Warn => line.yellow(),
                LogLevel::Error => line.red(),
            };
            println!("  {} {}", entry.timestamp.format("%H:%M:%S"), line);
        }
    }
}

fn print_versions(state: &OperationState) {
    let runtime = &state.versions.runtime;
    println!();
    println!(
        "  runtime:  current {}, latest {}{}",
        runtime.current.as_deref().unwrap_or("unknown"),
        runtime.latest.as_deref().unwrap_or("unknown"),
        if runtime.update_available {
            format!(" {}", "(update available)".yellow())
        } else {
            String::new()
        }
    );

    for (node, os) in &state.versions.os {
        let summary = match (&os.error, os.upgradable) {
            (Some(err), _) => format!("check failed: {err}").red(),
            (None, 0) => "up to date".green(),
            (None, n) => format!("{n} package(s) upgradable").yellow(),
        };
        println!("  os:       {:<20} {}", node, summary);
    }
}

fn operation_status(status: OperationStatus) -> ColoredString {
    match status {
        OperationStatus::Idle => "idle".normal(),
        OperationStatus::Checking => "checking".cyan(),
        OperationStatus::Updating => "updating".yellow(),
        OperationStatus::Complete => "complete".green(),
        OperationStatus::Error => "error".red(),
    }
}

fn node_status(status: NodeStatus) -> ColoredString {
    let label = format!("{:<12}", node_status_label(status));
    match status {
        NodeStatus::Pending => label.normal(),
        NodeStatus::InProgress => label.yellow(),
        NodeStatus::Complete => label.green(),
        NodeStatus::Error => label.red(),
        NodeStatus::Skipped => label.dimmed(),
    }
}

fn node_status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "pending",
        NodeStatus::InProgress => "in-progress",
        NodeStatus::Complete => "complete",
        NodeStatus::Error => "error",
        NodeStatus::Skipped => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_labels_match_wire_names() {
        for status in [
            NodeStatus::Pending,
            NodeStatus::InProgress,
            NodeStatus::Complete,
            NodeStatus::Error,
            NodeStatus::Skipped,
        ] {
            let wire = serde_json::to_value(status).unwrap();
            assert_eq!(wire, node_status_label(status));
        }
    }
}
