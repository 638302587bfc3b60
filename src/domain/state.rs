//! StateHolder — owns the live `OperationState`.
//!
//! Every mutation goes through `update` (or `log`), which persists the full
//! snapshot before releasing the lock. Readers only ever get a clone.

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::state_store::{StateStore, StoredState};
use super::types::{LogEntry, LogLevel, OperationState};

pub struct StateHolder {
    state: RwLock<OperationState>,
    store: StateStore,
    log_capacity: usize,
}

impl StateHolder {
    /// Load the persisted snapshot, reclassifying an interrupted operation as
    /// failed. A missing or corrupt file starts from the idle shape.
    pub async fn load(store: StateStore, log_capacity: usize) -> Self {
        let mut state = OperationState::default();

        if store.exists() {
            match store.read().await {
                Ok(stored) => {
                    info!(saved_at = %stored.saved_at, "loaded update state from disk");
                    state = stored.state;
                }
                Err(e) => {
                    warn!(error = %e, "failed to load update state, starting fresh");
                }
            }
        }

        let interrupted = state.recover_after_restart();

        let holder = Self {
            state: RwLock::new(state),
            store,
            log_capacity,
        };

        if interrupted {
            holder
                .log(None, LogLevel::Warn, "Process restarted during operation; marked as error")
                .await;
        }

        holder
    }

    /// Immutable copy of the current state.
    pub async fn snapshot(&self) -> OperationState {
        self.state.read().await.clone()
    }

    /// Apply `f` and persist the result.
    pub async fn update<R>(&self, f: impl FnOnce(&mut OperationState) -> R) -> R {
        let mut guard = self.state.write().await;
        let result = f(&mut guard);
        let stored = StoredState::new(guard.clone());
        self.persist(&stored).await;
        result
    }

    /// Append to the log ring (persisted) and mirror it to tracing.
    pub async fn log(&self, node: Option<&str>, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match (level, node) {
            (LogLevel::Info, Some(n)) => info!(node = n, "{message}"),
            (LogLevel::Info, None) => info!("{message}"),
            (LogLevel::Warn, Some(n)) => warn!(node = n, "{message}"),
            (LogLevel::Warn, None) => warn!("{message}"),
            (LogLevel::Error, Some(n)) => error!(node = n, "{message}"),
            (LogLevel::Error, None) => error!("{message}"),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            node: node.map(str::to_string),
            message,
            level,
        };
        let capacity = self.log_capacity;
        self.update(|s| s.push_log(entry, capacity)).await;
    }

    async fn persist(&self, stored: &StoredState) {
        if let Err(e) = self.store.write(stored).await {
            warn!(error = %e, "failed to persist update state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{OperationKind, OperationStatus, PlannedNode, NodeRole, NodeStatus};

    fn planned() -> Vec<PlannedNode> {
        vec![
            PlannedNode { name: "agent1".into(), role: NodeRole::Worker },
            PlannedNode { name: "server".into(), role: NodeRole::ControlPlane },
        ]
    }

    #[tokio::test]
    async fn every_update_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let holder = StateHolder::load(StateStore::new(path.clone()), 10).await;

        holder.update(|s| s.begin(OperationKind::OsUpdate, &planned())).await;

        let stored = StateStore::new(path).read().await.unwrap();
        assert_eq!(stored.state, holder.snapshot().await);
    }

    #[tokio::test]
    async fn interrupted_rollout_becomes_error_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let holder = StateHolder::load(StateStore::new(path.clone()), 10).await;
            holder
                .update(|s| {
                    s.begin(OperationKind::OsUpdate, &planned());
                    s.begin_node(0);
                })
                .await;
        }

        let reloaded = StateHolder::load(StateStore::new(path.clone()), 10).await;
        let state = reloaded.snapshot().await;
        assert_eq!(state.status, OperationStatus::Error);
        assert!(state.error.as_deref().unwrap().contains("restart"));
        // Nothing resumes: the in-flight node keeps its persisted status.
        assert_eq!(state.nodes["agent1"].status, NodeStatus::InProgress);
        assert_eq!(state.nodes["server"].status, NodeStatus::Pending);

        let on_disk = StateStore::new(path).read().await.unwrap();
        assert_eq!(on_disk.state.status, OperationStatus::Error);
    }

    #[tokio::test]
    async fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let holder = StateHolder::load(StateStore::new(path), 10).await;
        assert_eq!(holder.snapshot().await.status, OperationStatus::Idle);
    }

    #[tokio::test]
    async fn persistence_failure_does_not_fail_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // Parent is a regular file, so every write fails.
        let holder = StateHolder::load(StateStore::new(blocker.join("state.json")), 10).await;

        holder.update(|s| s.status = OperationStatus::Complete).await;
        assert_eq!(holder.snapshot().await.status, OperationStatus::Complete);
    }

    #[tokio::test]
    async fn log_ring_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let holder = StateHolder::load(StateStore::new(dir.path().join("s.json")), 3).await;
        for i in 0..10 {
            holder.log(Some("agent1"), LogLevel::Info, format!("line {i}")).await;
        }
        let logs = holder.snapshot().await.logs;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.back().unwrap().message, "line 9");
        assert_eq!(logs.front().unwrap().node.as_deref(), Some("agent1"));
    }
}
