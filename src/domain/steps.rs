//! Step plans — the fixed, ordered step lists a node walks through.

use serde::{Deserialize, Serialize};

use super::types::{NodeRole, OperationKind};

/// A single named action in a node's step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Cordon,
    Drain,
    FullUpgrade,
    Uncordon,
    WaitReady,
    UpgradeServer,
    WaitApiReady,
    UpgradeAgent,
}

impl StepKind {
    pub fn label(self) -> &'static str {
        match self {
            StepKind::Cordon => "Cordon",
            StepKind::Drain => "Drain",
            StepKind::FullUpgrade => "Full Upgrade",
            StepKind::Uncordon => "Uncordon",
            StepKind::WaitReady => "Wait Ready",
            StepKind::UpgradeServer => "Upgrade Server",
            StepKind::WaitApiReady => "Wait API Ready",
            StepKind::UpgradeAgent => "Upgrade Agent",
        }
    }
}

const OS_PACKAGE_STEPS: [StepKind; 5] = [
    StepKind::Cordon,
    StepKind::Drain,
    StepKind::FullUpgrade,
    StepKind::Uncordon,
    StepKind::WaitReady,
];

const RUNTIME_SERVER_STEPS: [StepKind; 2] = [StepKind::UpgradeServer, StepKind::WaitApiReady];

const RUNTIME_AGENT_STEPS: [StepKind; 5] = [
    StepKind::Cordon,
    StepKind::Drain,
    StepKind::UpgradeAgent,
    StepKind::Uncordon,
    StepKind::WaitReady,
];

/// Which step list applies to a node for a given operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPlan {
    /// OS package update, identical for every role.
    OsPackages,
    /// Runtime upgrade on a control-plane node.
    RuntimeServer,
    /// Runtime upgrade on a worker node.
    RuntimeAgent,
}

impl StepPlan {
    pub fn for_node(kind: OperationKind, role: NodeRole) -> Self {
        match (kind, role) {
            (OperationKind::OsUpdate, _) => StepPlan::OsPackages,
            (OperationKind::RuntimeUpgrade, NodeRole::ControlPlane) => StepPlan::RuntimeServer,
            (OperationKind::RuntimeUpgrade, NodeRole::Worker) => StepPlan::RuntimeAgent,
        }
    }

    pub fn steps(self) -> &'static [StepKind] {
        match self {
            StepPlan::OsPackages => &OS_PACKAGE_STEPS,
            StepPlan::RuntimeServer => &RUNTIME_SERVER_STEPS,
            StepPlan::RuntimeAgent => &RUNTIME_AGENT_STEPS,
        }
    }

    /// Whether a failed node must be uncordoned before giving up on it.
    pub fn uncordons_on_failure(self) -> bool {
        self.steps().contains(&StepKind::Cordon)
    }
}
