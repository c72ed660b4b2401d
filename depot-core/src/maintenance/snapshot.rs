//! 状态快照：把当前构件清单序列化后原子写入磁盘。

use crate::error::Result;
use crate::store::{ArtifactInfo, ArtifactStore};
use crate::trigger::Maintenance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// 快照来源。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotReason {
    /// 定时触发，受最小间隔约束
    Timer,
    /// 运维人员显式请求
    Operator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub artifact_count: usize,
    pub artifacts: Vec<ArtifactInfo>,
}

#[derive(Debug)]
pub struct SnapshotJob<S> {
    store: Arc<S>,
    path: PathBuf,
}

impl<S: ArtifactStore> SnapshotJob<S> {
    pub fn new(store: Arc<S>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub async fn write(&self, reason: SnapshotReason) -> Result<Snapshot> {
        let artifacts = self.store.list_all_artifacts().await?;
        let snapshot = Snapshot {
            taken_at: Utc::now(),
            reason,
            artifact_count: artifacts.len(),
            artifacts,
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        self.store
            .write_snapshot_atomically(&self.path, &data)
            .await?;
        info!(
            path = %self.path.display(),
            reason = ?reason,
            artifacts = snapshot.artifact_count,
            "state snapshot written"
        );
        Ok(snapshot)
    }
}

impl<S: ArtifactStore> Maintenance<SnapshotReason> for SnapshotJob<S> {
    async fn run(&mut self, reason: SnapshotReason) -> Result<()> {
        self.write(reason).await.map(|_| ())
    }
}
