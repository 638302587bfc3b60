//! Version checkers. Read-only: nothing here touches cluster scheduling.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;

use crate::cluster::ClusterNode;
use crate::exec::RemoteExecutor;
use crate::releases::ReleaseChannel;

use super::state::StateHolder;
use super::types::{LogLevel, NodeRole, OsPackageStatus, RuntimeVersions};

pub const OS_CHECK_COMMAND: &str =
    "sudo apt update -qq 2>/dev/null && apt list --upgradable 2>/dev/null";

/// Package names from `apt list --upgradable` output.
pub fn parse_upgradable(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("Listing") && !l.starts_with("WARNING") && !l.starts_with("N:"))
        .filter(|l| l.contains('/'))
        .filter_map(|l| l.split('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a runtime release tag such as `v1.30.2+k3s1`.
pub fn parse_runtime_version(tag: &str) -> Option<semver::Version> {
    semver::Version::parse(tag.trim().trim_start_matches('v')).ok()
}

/// Check every node for upgradable packages. A failing node is recorded with
/// `upgradable = -1` and the rest are still checked.
pub async fn check_os(
    nodes: &[ClusterNode],
    executor: &dyn RemoteExecutor,
    timeout: Duration,
    state: &StateHolder,
) {
    for node in nodes {
        state
            .log(Some(node.name.as_str()), LogLevel::Info, "Checking for upgradable packages...")
            .await;

        let status = match executor.execute(node, OS_CHECK_COMMAND, timeout).await {
            Ok(output) => {
                let packages = parse_upgradable(&output);
                state
                    .log(
                        Some(node.name.as_str()),
                        LogLevel::Info,
                        format!("{} package(s) upgradable", packages.len()),
                    )
                    .await;
                OsPackageStatus {
                    upgradable: packages.len() as i64,
                    packages,
                    last_checked: Utc::now(),
                    error: None,
                }
            }
            Err(e) => {
                state
                    .log(
                        Some(node.name.as_str()),
                        LogLevel::Warn,
                        format!("Failed to check OS updates: {e}"),
                    )
                    .await;
                OsPackageStatus {
                    upgradable: -1,
                    packages: Vec::new(),
                    last_checked: Utc::now(),
                    error: Some(e.to_string()),
                }
            }
        };

        let name = node.name.clone();
        state
            .update(|s| {
                s.versions.os.insert(name, status);
            })
            .await;
    }
}

/// Collect per-node runtime versions from inventory and the latest release
/// from the channel. An unreachable channel leaves `latest` unset.
pub async fn check_runtime(
    nodes: &[ClusterNode],
    releases: &dyn ReleaseChannel,
    state: &StateHolder,
) -> RuntimeVersions {
    let per_node: BTreeMap<String, String> = nodes
        .iter()
        .filter_map(|n| Some((n.name.clone(), n.runtime_version.clone()?)))
        .collect();

    let current = nodes
        .iter()
        .find(|n| n.role == NodeRole::ControlPlane && n.runtime_version.is_some())
        .or_else(|| nodes.iter().find(|n| n.runtime_version.is_some()))
        .and_then(|n| n.runtime_version.clone());

    let latest = match releases.latest().await {
        Ok(tag) => Some(tag),
        Err(e) => {
            state
                .log(
                    None,
                    LogLevel::Warn,
                    format!("Failed to fetch latest runtime version: {e:#}"),
                )
                .await;
            None
        }
    };

    let update_available = match (
        current.as_deref().and_then(parse_runtime_version),
        latest.as_deref().and_then(parse_runtime_version),
    ) {
        (Some(current), Some(latest)) => latest > current,
        _ => false,
    };

    let versions = RuntimeVersions {
        current,
        latest,
        update_available,
        per_node,
    };

    state
        .log(
            None,
            LogLevel::Info,
            format!(
                "Runtime version check complete. Current: {}, Latest: {}",
                versions.current.as_deref().unwrap_or("unknown"),
                versions.latest.as_deref().unwrap_or("unknown"),
            ),
        )
        .await;

    let stored = versions.clone();
    state.update(|s| s.versions.runtime = stored).await;
    versions
}
