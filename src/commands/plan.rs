//! `rollout plan` — preview the node order of a rollout without starting it.

use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::cluster::kubectl::KubectlCluster;
use crate::cluster::ClusterControl;
use crate::config;
use crate::domain::ordering;
use crate::domain::steps::StepPlan;
use crate::domain::types::{NodeRole, OperationKind};

use super::updates::{print_output, OutputFormat};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PlanTarget {
    Os,
    Runtime,
}

impl From<PlanTarget> for OperationKind {
    fn from(target: PlanTarget) -> Self {
        match target {
            PlanTarget::Os => OperationKind::OsUpdate,
            PlanTarget::Runtime => OperationKind::RuntimeUpgrade,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    node: String,
    role: NodeRole,
    steps: Vec<&'static str>,
}

pub fn run(target: PlanTarget, format: OutputFormat, config_path: Option<&str>) -> Result<()> {
    let cfg = config::load(config_path.map(Path::new))?;
    let kind = OperationKind::from(target);

    let rt = tokio::runtime::Runtime::new()?;
    let nodes = rt.block_on(KubectlCluster::new(&cfg.cluster).list_nodes())?;

    let plan: Vec<PlanEntry> = ordering::order(&nodes, kind)
        .into_iter()
        .map(|n| PlanEntry {
            steps: StepPlan::for_node(kind, n.role)
                .steps()
                .iter()
                .map(|s| s.label())
                .collect(),
            role: n.role,
            node: n.name,
        })
        .collect();

    if !matches!(format, OutputFormat::Table) {
        return print_output(format, &plan);
    }

    println!("{} {}", "rollout plan".bold(), kind);
    if plan.is_empty() {
        println!("  no nodes reported by the cluster");
        return Ok(());
    }
    for (i, entry) in plan.iter().enumerate() {
        println!(
            "  {}. {:<20} {:<14} {}",
            i + 1,
            entry.node,
            entry.role.to_string(),
            entry.steps.join(" → ").dimmed()
        );
    }
    Ok(())
}
