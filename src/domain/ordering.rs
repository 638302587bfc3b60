//! Node ordering policy.
//!
//! OS updates go workers first so the control plane stays up as long as
//! possible. Runtime upgrades go control plane first so agents only ever talk
//! to a server at least as new as themselves. Ties break by ascending name.

use std::cmp::Ordering;

use crate::cluster::ClusterNode;

use super::types::{NodeRole, OperationKind};

fn role_rank(kind: OperationKind, role: NodeRole) -> u8 {
    match (kind, role) {
        (OperationKind::OsUpdate, NodeRole::Worker) => 0,
        (OperationKind::OsUpdate, NodeRole::ControlPlane) => 1,
        (OperationKind::RuntimeUpgrade, NodeRole::ControlPlane) => 0,
        (OperationKind::RuntimeUpgrade, NodeRole::Worker) => 1,
    }
}

/// Sort `nodes` into processing order for `kind`.
pub fn order(nodes: &[ClusterNode], kind: OperationKind) -> Vec<ClusterNode> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by(|a, b| compare(kind, a, b));
    sorted
}

/// Node names in processing order for `kind`.
pub fn order_names(nodes: &[ClusterNode], kind: OperationKind) -> Vec<String> {
    order(nodes, kind).into_iter().map(|n| n.name).collect()
}

fn compare(kind: OperationKind, a: &ClusterNode, b: &ClusterNode) -> Ordering {
    role_rank(kind, a.role)
        .cmp(&role_rank(kind, b.role))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, role: NodeRole) -> ClusterNode {
        ClusterNode {
            name: name.to_string(),
            role,
            address: None,
            runtime_version: None,
            arch: None,
        }
    }

    fn cluster() -> Vec<ClusterNode> {
        vec![
            node("server", NodeRole::ControlPlane),
            node("agent2", NodeRole::Worker),
            node("agent1", NodeRole::Worker),
        ]
    }

    #[test]
    fn os_update_puts_workers_first() {
        assert_eq!(
            order_names(&cluster(), OperationKind::OsUpdate),
            vec!["agent1", "agent2", "server"]
        );
    }

    #[test]
    fn runtime_upgrade_puts_control_plane_first() {
        assert_eq!(
            order_names(&cluster(), OperationKind::RuntimeUpgrade),
            vec!["server", "agent1", "agent2"]
        );
    }

    #[test]
    fn role_partition_holds_for_mixed_sets() {
        let nodes = vec![
            node("zeta", NodeRole::Worker),
            node("cp-b", NodeRole::ControlPlane),
            node("alpha", NodeRole::Worker),
            node("cp-a", NodeRole::ControlPlane),
            node("mid", NodeRole::Worker),
        ];

        let os = order(&nodes, OperationKind::OsUpdate);
        let first_cp = os.iter().position(|n| n.role == NodeRole::ControlPlane).unwrap();
        assert!(os[first_cp..].iter().all(|n| n.role == NodeRole::ControlPlane));
        assert_eq!(
            os.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["alpha", "mid", "zeta", "cp-a", "cp-b"]
        );

        let rt = order(&nodes, OperationKind::RuntimeUpgrade);
        let first_worker = rt.iter().position(|n| n.role == NodeRole::Worker).unwrap();
        assert!(rt[first_worker..].iter().all(|n| n.role == NodeRole::Worker));
        assert_eq!(
            rt.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["cp-a", "cp-b", "alpha", "mid", "zeta"]
        );
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let mut reversed = cluster();
        reversed.reverse();
        for kind in [OperationKind::OsUpdate, OperationKind::RuntimeUpgrade] {
            assert_eq!(order_names(&cluster(), kind), order_names(&reversed, kind));
        }
    }
}
