//! Cluster control — the narrow façade the orchestrator needs from the
//! cluster API: inventory, cordon, drain, uncordon, and readiness.

pub mod kubectl;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::types::NodeRole;

/// A node as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub role: NodeRole,
    /// Internal address used for remote shell access.
    pub address: Option<String>,
    /// Runtime version reported by the node's kubelet.
    pub runtime_version: Option<String>,
    /// Kubernetes architecture string (`amd64`, `arm64`, `arm`).
    pub arch: Option<String>,
}

impl ClusterNode {
    /// Release asset name of the runtime binary for this node's architecture.
    pub fn runtime_asset(&self) -> &'static str {
        match self.arch.as_deref() {
            Some("arm64") | Some("aarch64") => "k3s-arm64",
            Some("arm") | Some("armhf") => "k3s-armhf",
            _ => "k3s",
        }
    }
}

#[async_trait]
pub trait ClusterControl: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    async fn cordon(&self, node: &str) -> Result<()>;

    /// Evict every evictable pod from `node`.
    async fn drain(&self, node: &str) -> Result<()>;

    async fn uncordon(&self, node: &str) -> Result<()>;

    /// Block until `node` reports Ready, failing once `timeout` elapses.
    async fn wait_ready(&self, node: &str, timeout: Duration) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(arch: Option<&str>) -> ClusterNode {
        ClusterNode {
            name: "n".into(),
            role: NodeRole::Worker,
            address: None,
            runtime_version: None,
            arch: arch.map(str::to_string),
        }
    }

    #[test]
    fn runtime_asset_follows_arch() {
        assert_eq!(node(Some("amd64")).runtime_asset(), "k3s");
        assert_eq!(node(Some("arm64")).runtime_asset(), "k3s-arm64");
        assert_eq!(node(Some("arm")).runtime_asset(), "k3s-armhf");
        assert_eq!(node(None).runtime_asset(), "k3s");
    }
}
