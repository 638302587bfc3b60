//! In-memory fakes for the cluster, executor, and release channel seams.

use std::collections::{HashMap, HashSet};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::cluster::{ClusterControl, ClusterNode};
use crate::exec::{ExecError, RemoteExecutor};
use crate::releases::ReleaseChannel;

use super::types::NodeRole;

pub fn cluster_node(name: &str, role: NodeRole) -> ClusterNode {
    ClusterNode {
        name: name.to_string(),
        role,
        address: Some(format!("{name}.lan")),
        runtime_version: None,
        arch: Some("arm64".to_string()),
    }
}

/// `server` (control plane) plus `agent1` and `agent2` (workers).
pub fn three_nodes() -> Vec<ClusterNode> {
    vec![
        cluster_node("server", NodeRole::ControlPlane),
        cluster_node("agent1", NodeRole::Worker),
        cluster_node("agent2", NodeRole::Worker),
    ]
}

// ── Cluster ────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCluster {
    nodes: Vec<ClusterNode>,
    failures: HashMap<(String, String), String>,
    list_error: Option<String>,
    gate: Option<Arc<Semaphore>>,
    cordoned: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Make `op` ("cordon", "drain", "uncordon", "wait_ready") fail on `node`.
    pub fn fail(mut self, op: &str, node: &str, message: &str) -> Self {
        self.failures
            .insert((op.to_string(), node.to_string()), message.to_string());
        self
    }

    pub fn fail_listing(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Every cordon consumes a permit from the returned gate, which starts
    /// empty.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn is_cordoned(&self, node: &str) -> bool {
        self.cordoned.lock().unwrap().contains(node)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, node: &str) -> Result<()> {
        self.record_call(op, node, format!("{op}:{node}"))
    }

    fn record_call(&self, op: &str, node: &str, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.get(&(op.to_string(), node.to_string())) {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterControl for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        if let Some(message) = &self.list_error {
            bail!("{}", message);
        }
        Ok(self.nodes.clone())
    }

    async fn cordon(&self, node: &str) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.record("cordon", node)?;
        self.cordoned.lock().unwrap().insert(node.to_string());
        Ok(())
    }

    async fn drain(&self, node: &str) -> Result<()> {
        self.record("drain", node)
    }

    async fn uncordon(&self, node: &str) -> Result<()> {
        self.record("uncordon", node)?;
        self.cordoned.lock().unwrap().remove(node);
        Ok(())
    }

    /// Recorded as `wait_ready:<node>:<timeout secs>`.
    async fn wait_ready(&self, node: &str, timeout: Duration) -> Result<()> {
        let call = format!("wait_ready:{node}:{}", timeout.as_secs());
        self.record_call("wait_ready", node, call)
    }
}

// ── Executor ───────────────────────────────────────────────

#[derive(Clone)]
enum Outcome {
    Output(String),
    Fail(String),
    Timeout,
}

struct Rule {
    node: String,
    contains: Option<String>,
    outcome: Outcome,
}

#[derive(Default)]
pub struct FakeExecutor {
    rules: Vec<Rule>,
    commands: Mutex<Vec<(String, String)>>,
}

impl FakeExecutor {
    pub fn respond(self, node: &str, output: &str) -> Self {
        self.rule(node, None, Outcome::Output(output.to_string()))
    }

    pub fn fail(self, node: &str, output: &str) -> Self {
        self.rule(node, None, Outcome::Fail(output.to_string()))
    }

    /// Time out any command on `node` containing `fragment`.
    pub fn time_out_on(self, node: &str, fragment: &str) -> Self {
        self.rule(node, Some(fragment.to_string()), Outcome::Timeout)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    fn rule(mut self, node: &str, contains: Option<String>, outcome: Outcome) -> Self {
        self.rules.push(Rule {
            node: node.to_string(),
            contains,
            outcome,
        });
        self
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        node: &ClusterNode,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        self.commands
            .lock()
            .unwrap()
            .push((node.name.clone(), command.to_string()));

        let outcome = self
            .rules
            .iter()
            .find(|r| {
                r.node == node.name
                    && r.contains.as_deref().map_or(true, |f| command.contains(f))
            })
            .map(|r| r.outcome.clone())
            .unwrap_or_else(|| Outcome::Output("done\n".to_string()));

        match outcome {
            Outcome::Output(output) => Ok(output),
            Outcome::Fail(output) => Err(ExecError::Failed {
                node: node.name.clone(),
                status: ExitStatus::from_raw(1 << 8),
                output,
            }),
            Outcome::Timeout => Err(ExecError::Timeout {
                node: node.name.clone(),
                secs: timeout.as_secs(),
                output: String::new(),
            }),
        }
    }
}

// ── Releases ───────────────────────────────────────────────

pub struct FakeReleases(Option<String>);

impl FakeReleases {
    pub fn publishing(tag: &str) -> Self {
        Self(Some(tag.to_string()))
    }

    pub fn unreachable() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ReleaseChannel for FakeReleases {
    async fn latest(&self) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| anyhow!("release channel unreachable"))
    }
}
