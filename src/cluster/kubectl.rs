//! `kubectl`-backed cluster control, run on the orchestrator's own host.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{ClusterControl, ClusterNode};
use crate::config::ClusterConfig;
use crate::domain::types::NodeRole;

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

pub struct KubectlCluster {
    kubectl: String,
    kubeconfig: Option<String>,
    drain_timeout_secs: u64,
    poll_interval: Duration,
}

impl KubectlCluster {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            kubeconfig: config.kubeconfig.clone(),
            drain_timeout_secs: config.drain_timeout_secs,
            poll_interval: Duration::from_secs(config.ready_poll_interval_secs.max(1)),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.args(["--kubeconfig", kubeconfig.as_str()]);
        }

        let output = cmd
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("running {} {}", self.kubectl, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("kubectl {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn node_ready(&self, node: &str) -> Result<bool> {
        let out = self.run(&["get", "node", node, "-o", "json"]).await?;
        let json: Value = serde_json::from_str(&out).context("parsing node JSON")?;
        Ok(node_is_ready(&json))
    }
}

#[async_trait]
impl ClusterControl for KubectlCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let out = self.run(&["get", "nodes", "-o", "json"]).await?;
        let json: Value = serde_json::from_str(&out).context("parsing node list JSON")?;
        Ok(parse_nodes(&json))
    }

    async fn cordon(&self, node: &str) -> Result<()> {
        self.run(&["cordon", node]).await.map(drop)
    }

    async fn drain(&self, node: &str) -> Result<()> {
        let timeout = format!("--timeout={}s", self.drain_timeout_secs);
        self.run(&[
            "drain",
            node,
            "--ignore-daemonsets",
            "--delete-emptydir-data",
            "--force",
            timeout.as_str(),
        ])
        .await
        .map(drop)
    }

    async fn uncordon(&self, node: &str) -> Result<()> {
        self.run(&["uncordon", node]).await.map(drop)
    }

    async fn wait_ready(&self, node: &str, timeout: Duration) -> Result<()> {
        // The deadline covers in-flight kubectl calls too; a hung call is
        // dropped and its process killed.
        let poll = async {
            loop {
                match self.node_ready(node).await {
                    Ok(true) => return,
                    Ok(false) => debug!(node, "node not Ready yet"),
                    Err(e) => debug!(node, error = %e, "readiness query failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| anyhow!("node {} not Ready after {}s", node, timeout.as_secs()))
    }
}

/// Extract inventory from a `kubectl get nodes -o json` document.
pub fn parse_nodes(list: &Value) -> Vec<ClusterNode> {
    list.get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_node).collect())
        .unwrap_or_default()
}

fn parse_node(item: &Value) -> Option<ClusterNode> {
    let name = item.pointer("/metadata/name")?.as_str()?.to_string();

    let is_server = item
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels.keys().any(|label| {
                matches!(
                    label.strip_prefix(ROLE_LABEL_PREFIX),
                    Some("control-plane") | Some("master")
                )
            })
        })
        .unwrap_or(false);

    let address = item
        .pointer("/status/addresses")
        .and_then(Value::as_array)
        .and_then(|addrs| {
            addrs
                .iter()
                .find(|a| a.get("type").and_then(Value::as_str) == Some("InternalIP"))
        })
        .and_then(|a| a.get("address"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let node_info = |field: &str| {
        item.pointer(&format!("/status/nodeInfo/{field}"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(ClusterNode {
        name,
        role: if is_server {
            NodeRole::ControlPlane
        } else {
            NodeRole::Worker
        },
        address,
        runtime_version: node_info("kubeletVersion"),
        arch: node_info("architecture"),
    })
}

/// Whether a node document carries `Ready=True`.
pub fn node_is_ready(node: &Value) -> bool {
    node.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}
