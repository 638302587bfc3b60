//! StateStore — atomic file I/O with SHA-256 integrity and write locking.
//!
//! The persisted document is the last full snapshot of `OperationState`;
//! there is no write-ahead log.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use super::types::OperationState;

/// A state snapshot wrapped with integrity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    /// SHA-256 checksum of the serialized state: "sha256:<hex>"
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
    pub state: OperationState,
}

impl StoredState {
    pub fn new(state: OperationState) -> Self {
        Self {
            checksum: checksum(&state),
            saved_at: Utc::now(),
            state,
        }
    }

    pub fn verify(&self) -> bool {
        self.checksum == checksum(&self.state)
    }
}

fn checksum(state: &OperationState) -> String {
    let serialized = serde_json::to_string(state).unwrap_or_default();
    format!("sha256:{:x}", Sha256::digest(serialized.as_bytes()))
}

pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Serialize to a `.tmp` sibling, then rename over the final path.
    pub async fn write(&self, stored: &StoredState) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let content =
            serde_json::to_string_pretty(stored).context("failed to serialize StoredState")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .with_context(|| format!("writing temp file {}", tmp_path.display()))?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "renaming {} to {}",
                    tmp_path.display(),
                    self.path.display()
                )
            })?;

        Ok(())
    }

    /// Read the snapshot and verify its checksum.
    pub async fn read(&self) -> Result<StoredState> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;

        let stored: StoredState = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        if !stored.verify() {
            warn!(path = %self.path.display(), "state file checksum mismatch");
            bail!("checksum verification failed for {}", self.path.display());
        }

        Ok(stored)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{OperationKind, OperationStatus, PlannedNode, NodeRole};

    fn sample() -> OperationState {
        let mut state = OperationState::default();
        state.begin(
            OperationKind::OsUpdate,
            &[PlannedNode {
                name: "agent1".into(),
                role: NodeRole::Worker,
            }],
        );
        state
    }

    #[tokio::test]
    async fn write_then_read_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        assert!(!store.exists());

        store.write(&StoredState::new(sample())).await.unwrap();
        assert!(store.exists());
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());

        let stored = store.read().await.unwrap();
        assert_eq!(stored.state.status, OperationStatus::Updating);
        assert_eq!(stored.state.node_order, vec!["agent1"]);
    }

    #[tokio::test]
    async fn tampered_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(path.clone());
        store.write(&StoredState::new(sample())).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"updating\"", "\"complete\"")).unwrap();

        assert!(store.read().await.is_err());
    }
}
