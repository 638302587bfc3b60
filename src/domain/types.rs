//! Operation state — the full shape exposed by the status surface and
//! persisted to disk after every mutation.
//!
//! All transitions live here as plain methods on `OperationState` so the
//! state machine can be exercised without a runtime. The update manager is
//! the only caller that mutates a live instance.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::steps::{StepKind, StepPlan};

/// Top-level lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    #[default]
    Idle,
    Checking,
    Updating,
    Complete,
    Error,
}

impl OperationStatus {
    /// Whether a check or rollout currently owns the state.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Checking | Self::Updating)
    }
}

/// Which rolling workflow is active or last ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    OsUpdate,
    RuntimeUpgrade,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::OsUpdate => write!(f, "os-update"),
            OperationKind::RuntimeUpgrade => write!(f, "runtime-upgrade"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub kind: StepKind,
    pub name: String,
    pub status: StepStatus,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub status: NodeStatus,
    pub role: NodeRole,
    pub steps: Vec<StepProgress>,
    pub error: Option<String>,
}

impl NodeProgress {
    /// A pending node whose step list is fixed by `plan`.
    pub fn new(role: NodeRole, plan: StepPlan) -> Self {
        let steps = plan
            .steps()
            .iter()
            .map(|kind| StepProgress {
                kind: *kind,
                name: kind.label().to_string(),
                status: StepStatus::Pending,
                output: String::new(),
            })
            .collect();

        Self {
            status: NodeStatus::Pending,
            role,
            steps,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node: Option<String>,
    pub message: String,
    pub level: LogLevel,
}

// ── Versions ───────────────────────────────────────────────

/// Result of the OS package check on one node.
///
/// `upgradable` is `-1` when the check itself failed; `error` then carries
/// the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsPackageStatus {
    pub upgradable: i64,
    pub packages: Vec<String>,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeVersions {
    pub current: Option<String>,
    pub latest: Option<String>,
    pub update_available: bool,
    pub per_node: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub os: BTreeMap<String, OsPackageStatus>,
    pub runtime: RuntimeVersions,
}

// ── Operation state ────────────────────────────────────────

/// One node entry of a freshly computed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub name: String,
    pub role: NodeRole,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperationState {
    pub status: OperationStatus,
    pub operation: Option<OperationKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub node_order: Vec<String>,
    pub current_node_index: Option<usize>,
    pub nodes: BTreeMap<String, NodeProgress>,
    pub versions: VersionInfo,
    pub logs: VecDeque<LogEntry>,
}

pub const RESTART_MESSAGE: &str = "Process restarted during operation";

impl OperationState {
    /// Append to the log ring, evicting the oldest entries beyond `capacity`.
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }

    /// Back to the idle shape. Version check results survive.
    pub fn reset(&mut self) {
        let versions = std::mem::take(&mut self.versions);
        *self = Self {
            versions,
            ..Self::default()
        };
    }

    /// Reclassify an interrupted check or rollout as failed.
    ///
    /// Returns `true` when the loaded snapshot was mid-operation. Nodes and
    /// steps are left exactly as they were persisted.
    pub fn recover_after_restart(&mut self) -> bool {
        if !self.status.is_busy() {
            return false;
        }
        self.status = OperationStatus::Error;
        self.error = Some(RESTART_MESSAGE.to_string());
        true
    }

    /// Install a new plan and enter `Updating`. Logs from the previous run are
    /// dropped.
    pub fn begin(&mut self, kind: OperationKind, plan: &[PlannedNode]) {
        self.status = OperationStatus::Updating;
        self.operation = Some(kind);
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error = None;
        self.node_order = plan.iter().map(|n| n.name.clone()).collect();
        self.current_node_index = None;
        self.nodes = plan
            .iter()
            .map(|n| {
                let progress = NodeProgress::new(n.role, StepPlan::for_node(kind, n.role));
                (n.name.clone(), progress)
            })
            .collect();
        self.logs.clear();
    }

    pub fn begin_node(&mut self, index: usize) {
        self.current_node_index = Some(index);
        if let Some(node) = self.node_at_mut(index) {
            node.status = NodeStatus::InProgress;
        }
    }

    pub fn start_step(&mut self, node: &str, step: usize) {
        if let Some(s) = self.step_mut(node, step) {
            s.status = StepStatus::InProgress;
        }
    }

    pub fn finish_step(&mut self, node: &str, step: usize, output: String) {
        if let Some(s) = self.step_mut(node, step) {
            s.status = StepStatus::Complete;
            s.output = output;
        }
    }

    pub fn fail_step(&mut self, node: &str, step: usize, message: String) {
        if let Some(s) = self.step_mut(node, step) {
            s.status = StepStatus::Error;
            s.output = message;
        }
    }

    pub fn complete_node(&mut self, index: usize) {
        if let Some(node) = self.node_at_mut(index) {
            node.status = NodeStatus::Complete;
        }
    }

    /// Mark the node at `index` failed, skip every later node, and end the
    /// operation in `Error`.
    pub fn fail_node(&mut self, index: usize, message: &str) {
        let name = self.node_order.get(index).cloned().unwrap_or_default();
        if let Some(node) = self.nodes.get_mut(&name) {
            node.status = NodeStatus::Error;
            node.error = Some(message.to_string());
        }

        let remaining: Vec<String> = self.node_order.iter().skip(index + 1).cloned().collect();
        for later in remaining {
            if let Some(node) = self.nodes.get_mut(&later) {
                node.status = NodeStatus::Skipped;
            }
        }

        self.status = OperationStatus::Error;
        self.error = Some(format!("Failed on node {name}: {message}"));
        self.completed_at = Some(Utc::now());
    }

    pub fn complete_operation(&mut self) {
        self.status = OperationStatus::Complete;
        self.completed_at = Some(Utc::now());
    }

    fn node_at_mut(&mut self, index: usize) -> Option<&mut NodeProgress> {
        let name = self.node_order.get(index)?;
        self.nodes.get_mut(name)
    }

    fn step_mut(&mut self, node: &str, step: usize) -> Option<&mut StepProgress> {
        self.nodes.get_mut(node)?.steps.get_mut(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Vec<PlannedNode> {
        vec![
            PlannedNode { name: "agent1".into(), role: NodeRole::Worker },
            PlannedNode { name: "agent2".into(), role: NodeRole::Worker },
            PlannedNode { name: "server".into(), role: NodeRole::ControlPlane },
        ]
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            node: None,
            message: message.to_string(),
            level: LogLevel::Info,
        }
    }

    #[test]
    fn log_ring_evicts_oldest() {
        let mut state = OperationState::default();
        for i in 0..5 {
            state.push_log(entry(&format!("line {i}")), 3);
        }
        let messages: Vec<_> = state.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn begin_builds_role_specific_steps() {
        let mut state = OperationState::default();
        state.begin(OperationKind::RuntimeUpgrade, &plan());

        assert_eq!(state.status, OperationStatus::Updating);
        assert_eq!(state.node_order, vec!["agent1", "agent2", "server"]);
        assert_eq!(state.nodes["server"].steps.len(), 2);
        assert_eq!(state.nodes["agent1"].steps.len(), 5);
        assert!(state
            .nodes
            .values()
            .all(|n| n.status == NodeStatus::Pending));
    }

    #[test]
    fn fail_node_skips_everything_after_it() {
        let mut state = OperationState::default();
        state.begin(OperationKind::OsUpdate, &plan());
        state.begin_node(0);
        state.complete_node(0);
        state.begin_node(1);
        state.fail_node(1, "boom");

        assert_eq!(state.nodes["agent1"].status, NodeStatus::Complete);
        assert_eq!(state.nodes["agent2"].status, NodeStatus::Error);
        assert_eq!(state.nodes["agent2"].error.as_deref(), Some("boom"));
        assert_eq!(state.nodes["server"].status, NodeStatus::Skipped);
        assert_eq!(state.status, OperationStatus::Error);
        assert_eq!(state.error.as_deref(), Some("Failed on node agent2: boom"));
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn reset_keeps_versions() {
        let mut state = OperationState::default();
        state.versions.runtime.latest = Some("v1.30.2+k3s1".into());
        state.begin(OperationKind::OsUpdate, &plan());
        state.status = OperationStatus::Complete;

        state.reset();

        assert_eq!(state.status, OperationStatus::Idle);
        assert!(state.nodes.is_empty());
        assert!(state.node_order.is_empty());
        assert_eq!(state.versions.runtime.latest.as_deref(), Some("v1.30.2+k3s1"));
    }

    #[test]
    fn restart_recovery_only_touches_busy_states() {
        let mut idle = OperationState::default();
        assert!(!idle.recover_after_restart());
        assert_eq!(idle.status, OperationStatus::Idle);

        let mut checking = OperationState {
            status: OperationStatus::Checking,
            ..Default::default()
        };
        assert!(checking.recover_after_restart());
        assert_eq!(checking.status, OperationStatus::Error);
        assert!(checking.error.unwrap().contains("restart"));
    }

    #[test]
    fn serialized_shape_uses_camel_case_keys() {
        let mut state = OperationState::default();
        state.begin(OperationKind::OsUpdate, &plan());
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["status"], "updating");
        assert_eq!(json["operation"], "os-update");
        assert!(json.get("nodeOrder").is_some());
        assert!(json["currentNodeIndex"].is_null());
        assert_eq!(json["nodes"]["agent1"]["steps"][2]["name"], "Full Upgrade");
    }
}
