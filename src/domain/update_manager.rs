//! Update manager — the single owner of the orchestrator state.
//!
//! `check`, `start`, and `reset` are serialized by a command lock and guarded
//! by the current status. `start` validates, plans, persists the initial
//! snapshot, and hands the node loop to a detached task; callers observe
//! progress only through `status()` snapshots.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cluster::{ClusterControl, ClusterNode};
use crate::config::{RolloutConfig, RuntimeConfig};
use crate::exec::{tail_chars, RemoteExecutor};
use crate::releases::ReleaseChannel;

use super::engine;
use super::ordering;
use super::state::StateHolder;
use super::steps::{StepKind, StepPlan};
use super::types::{
    LogLevel, OperationKind, OperationState, OperationStatus, PlannedNode,
};
use super::versions;

const FULL_UPGRADE_COMMAND: &str =
    "sudo apt update -qq 2>/dev/null && sudo DEBIAN_FRONTEND=noninteractive apt full-upgrade -y 2>&1";

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("An update operation is already in progress")]
    AlreadyInProgress,

    #[error("Target version is required")]
    MissingTargetVersion,

    #[error("Invalid target version '{0}' (expected a release tag such as v1.30.2+k3s1)")]
    InvalidTargetVersion(String),

    #[error("Cannot reset while an operation is in progress")]
    ResetWhileRunning,

    #[error("failed to list cluster nodes: {0:#}")]
    Inventory(anyhow::Error),

    #[error("update check failed: {0:#}")]
    Check(anyhow::Error),
}

/// Timeouts, output limits, and runtime install locations.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub rollout: RolloutConfig,
    pub runtime: RuntimeConfig,
}

/// A rollout that passed its preconditions and is now running.
#[derive(Debug)]
pub struct Started {
    pub operation: OperationKind,
    pub node_order: Vec<String>,
    /// Completes when the node loop ends. Dropping it detaches the rollout.
    pub task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct UpdateManager {
    state: Arc<StateHolder>,
    cluster: Arc<dyn ClusterControl>,
    executor: Arc<dyn RemoteExecutor>,
    releases: Arc<dyn ReleaseChannel>,
    settings: Arc<Settings>,
    command_lock: Arc<Mutex<()>>,
}

impl UpdateManager {
    pub fn new(
        state: Arc<StateHolder>,
        cluster: Arc<dyn ClusterControl>,
        executor: Arc<dyn RemoteExecutor>,
        releases: Arc<dyn ReleaseChannel>,
        settings: Settings,
    ) -> Self {
        Self {
            state,
            cluster,
            executor,
            releases,
            settings: Arc::new(settings),
            command_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Snapshot of the full state. Safe at any time.
    pub async fn status(&self) -> OperationState {
        self.state.snapshot().await
    }

    /// Processing order `kind` would use over the current inventory.
    /// Read-only.
    pub async fn plan(&self, kind: OperationKind) -> Result<Vec<String>, UpdateError> {
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(UpdateError::Inventory)?;
        Ok(ordering::order_names(&nodes, kind))
    }

    /// Discover OS package and runtime versions on every node.
    pub async fn check(&self) -> Result<OperationState, UpdateError> {
        let this = self.clone();
        detached(async move { this.run_check().await }).await
    }

    /// Start a rolling operation. Returns once the plan is persisted.
    pub async fn start(
        &self,
        kind: OperationKind,
        target_version: Option<String>,
    ) -> Result<Started, UpdateError> {
        let this = self.clone();
        detached(async move { this.begin(kind, target_version).await }).await
    }

    /// Return to idle, keeping version check results.
    pub async fn reset(&self) -> Result<(), UpdateError> {
        let _guard = self.command_lock.lock().await;
        if self.state.snapshot().await.status.is_busy() {
            return Err(UpdateError::ResetWhileRunning);
        }
        self.state.update(|s| s.reset()).await;
        self.state.log(None, LogLevel::Info, "State reset to idle").await;
        Ok(())
    }

    async fn run_check(&self) -> Result<OperationState, UpdateError> {
        {
            let _guard = self.command_lock.lock().await;
            if self.state.snapshot().await.status.is_busy() {
                return Err(UpdateError::AlreadyInProgress);
            }
            self.state
                .update(|s| s.status = OperationStatus::Checking)
                .await;
        }

        self.state
            .log(None, LogLevel::Info, "Checking for updates on all nodes...")
            .await;

        let nodes = match self.cluster.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                let message = format!("{e:#}");
                self.state
                    .update(|s| {
                        s.status = OperationStatus::Error;
                        s.error = Some(message.clone());
                    })
                    .await;
                self.state
                    .log(None, LogLevel::Error, format!("Update check failed: {message}"))
                    .await;
                return Err(UpdateError::Check(e.context("listing cluster nodes")));
            }
        };

        tokio::join!(
            versions::check_os(
                &nodes,
                self.executor.as_ref(),
                self.settings.rollout.check_timeout(),
                &self.state,
            ),
            versions::check_runtime(&nodes, self.releases.as_ref(), &self.state),
        );

        self.state
            .update(|s| s.status = OperationStatus::Idle)
            .await;
        self.state
            .log(None, LogLevel::Info, "Update check complete")
            .await;

        Ok(self.state.snapshot().await)
    }

    async fn begin(
        &self,
        kind: OperationKind,
        target_version: Option<String>,
    ) -> Result<Started, UpdateError> {
        let _guard = self.command_lock.lock().await;

        if self.state.snapshot().await.status.is_busy() {
            return Err(UpdateError::AlreadyInProgress);
        }

        let target_version = match kind {
            OperationKind::OsUpdate => None,
            OperationKind::RuntimeUpgrade => Some(validate_target(target_version)?),
        };

        let inventory = self
            .cluster
            .list_nodes()
            .await
            .map_err(UpdateError::Inventory)?;
        let nodes = ordering::order(&inventory, kind);
        let plan: Vec<PlannedNode> = nodes
            .iter()
            .map(|n| PlannedNode {
                name: n.name.clone(),
                role: n.role,
            })
            .collect();
        let node_order: Vec<String> = plan.iter().map(|n| n.name.clone()).collect();

        self.state.update(|s| s.begin(kind, &plan)).await;

        let description = match &target_version {
            Some(version) => format!("Starting runtime upgrade to {version}"),
            None => "Starting rolling OS update".to_string(),
        };
        self.state
            .log(
                None,
                LogLevel::Info,
                format!("{description}. Order: {}", node_order.join(" → ")),
            )
            .await;

        let rollout = Rollout {
            state: self.state.clone(),
            cluster: self.cluster.clone(),
            executor: self.executor.clone(),
            settings: self.settings.clone(),
            kind,
            target_version,
            nodes,
        };
        let task = tokio::spawn(rollout.run());

        Ok(Started {
            operation: kind,
            node_order,
            task,
        })
    }
}

fn validate_target(target_version: Option<String>) -> Result<String, UpdateError> {
    let version = target_version
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(UpdateError::MissingTargetVersion)?;

    if !version.starts_with('v') || versions::parse_runtime_version(&version).is_none() {
        return Err(UpdateError::InvalidTargetVersion(version));
    }
    Ok(version)
}

/// Run `fut` on its own task and wait for it. Request handlers can be dropped
/// mid-flight; a state transition that has begun must still finish.
async fn detached<F>(fut: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(output) => output,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

// ── Rollout task ───────────────────────────────────────────

struct Rollout {
    state: Arc<StateHolder>,
    cluster: Arc<dyn ClusterControl>,
    executor: Arc<dyn RemoteExecutor>,
    settings: Arc<Settings>,
    kind: OperationKind,
    target_version: Option<String>,
    nodes: Vec<ClusterNode>,
}

impl Rollout {
    async fn run(self) {
        let label = match self.kind {
            OperationKind::OsUpdate => "OS update",
            OperationKind::RuntimeUpgrade => "Runtime upgrade",
        };

        for (index, node) in self.nodes.iter().enumerate() {
            self.state.update(|s| s.begin_node(index)).await;
            let plan = StepPlan::for_node(self.kind, node.role);

            if let Err(e) = self.run_node(node, plan).await {
                let message = format!("{e:#}");
                self.state
                    .log(Some(node.name.as_str()), LogLevel::Error, format!("Error: {message}"))
                    .await;

                if plan.uncordons_on_failure() {
                    if let Err(ue) = self.cluster.uncordon(&node.name).await {
                        self.state
                            .log(
                                Some(node.name.as_str()),
                                LogLevel::Warn,
                                format!("Best-effort uncordon failed: {ue:#}"),
                            )
                            .await;
                    }
                }

                self.state.update(|s| s.fail_node(index, &message)).await;
                return;
            }

            self.state.update(|s| s.complete_node(index)).await;
            self.state
                .log(Some(node.name.as_str()), LogLevel::Info, format!("{label} complete"))
                .await;
        }

        // Logged while still Updating: nothing may follow Complete.
        let summary = match &self.target_version {
            Some(version) => format!("{label} to {version} complete on all nodes"),
            None => format!("Rolling {label} complete on all nodes"),
        };
        self.state.log(None, LogLevel::Info, summary).await;
        self.state.update(|s| s.complete_operation()).await;
    }

    async fn run_node(&self, node: &ClusterNode, plan: StepPlan) -> Result<()> {
        for (index, kind) in plan.steps().iter().enumerate() {
            engine::run_step(&self.state, &node.name, index, self.action(*kind, node)).await?;
        }
        Ok(())
    }

    async fn action(&self, kind: StepKind, node: &ClusterNode) -> Result<String> {
        let name = node.name.as_str();
        let rollout = &self.settings.rollout;
        match kind {
            StepKind::Cordon => {
                self.note(name, "Cordoning node...").await;
                self.cluster.cordon(name).await?;
                Ok("Node cordoned".to_string())
            }
            StepKind::Drain => {
                self.note(name, "Draining pods...").await;
                self.cluster.drain(name).await?;
                Ok("Pods drained".to_string())
            }
            StepKind::FullUpgrade => {
                self.note(name, "Running apt full-upgrade...").await;
                let output = self
                    .executor
                    .execute(node, FULL_UPGRADE_COMMAND, rollout.upgrade_timeout())
                    .await
                    .context("apt full-upgrade")?;
                self.note(name, "Apt full-upgrade completed").await;
                Ok(self.tail(&output))
            }
            StepKind::Uncordon => {
                self.note(name, "Uncordoning node...").await;
                self.cluster.uncordon(name).await?;
                Ok("Node uncordoned".to_string())
            }
            StepKind::WaitReady => {
                self.note(name, "Waiting for node to be Ready...").await;
                self.cluster
                    .wait_ready(name, rollout.wait_ready_timeout())
                    .await?;
                Ok("Node is Ready".to_string())
            }
            StepKind::UpgradeServer => {
                let version = self.version()?;
                self.note(name, &format!("Upgrading runtime server to {version}..."))
                    .await;
                let command = server_upgrade_command(&self.settings.runtime, version);
                let output = self
                    .executor
                    .execute(node, &command, rollout.upgrade_timeout())
                    .await
                    .context("runtime server install")?;
                self.note(name, "Runtime server install script completed").await;
                Ok(self.tail(&output))
            }
            StepKind::WaitApiReady => {
                self.note(name, "Waiting for API server to come back...").await;
                tokio::time::sleep(rollout.server_restart_grace()).await;
                self.cluster
                    .wait_ready(name, rollout.api_ready_timeout())
                    .await?;
                Ok("API server is back".to_string())
            }
            StepKind::UpgradeAgent => {
                let version = self.version()?;
                self.note(name, &format!("Upgrading runtime agent binary to {version}..."))
                    .await;
                let command = agent_upgrade_command(&self.settings.runtime, version, node);
                let output = self
                    .executor
                    .execute(node, &command, rollout.upgrade_timeout())
                    .await
                    .context("runtime agent binary swap")?;
                self.note(name, "Runtime agent binary upgraded").await;
                let tail = self.tail(&output);
                if tail.trim().is_empty() {
                    Ok("Binary replaced and agent restarted".to_string())
                } else {
                    Ok(tail)
                }
            }
        }
    }

    fn version(&self) -> Result<&str> {
        self.target_version
            .as_deref()
            .context("runtime upgrade has no target version")
    }

    fn tail(&self, output: &str) -> String {
        tail_chars(output, self.settings.rollout.output_tail_chars).to_string()
    }

    async fn note(&self, node: &str, message: &str) {
        self.state.log(Some(node), LogLevel::Info, message).await;
    }
}

fn server_upgrade_command(runtime: &RuntimeConfig, version: &str) -> String {
    format!(
        "curl -sfL {} | INSTALL_K3S_VERSION={} sh -",
        runtime.install_script_url, version
    )
}

fn agent_upgrade_command(runtime: &RuntimeConfig, version: &str, node: &ClusterNode) -> String {
    let url = format!(
        "{}/{}/{}",
        runtime.binary_base_url.trim_end_matches('/'),
        version.replace('+', "%2B"),
        node.runtime_asset()
    );
    [
        format!("sudo systemctl stop {}", runtime.agent_service),
        format!("curl -sfL {url} -o /tmp/k3s-new"),
        format!(
            "sudo mv /tmp/k3s-new {path} && sudo chmod +x {path}",
            path = runtime.binary_path
        ),
        format!("sudo systemctl start {}", runtime.agent_service),
    ]
    .join(" && ")
}
