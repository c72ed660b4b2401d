//! 构件存储协作者：维护任务只通过 [`ArtifactStore`] 访问存储层。

mod fs;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;

pub use fs::FsArtifactStore;

/// Minimal listing info for a stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// 清理与快照所需的存储操作。
pub trait ArtifactStore: Send + Sync + 'static {
    fn total_artifact_count(&self) -> impl Future<Output = Result<usize>> + Send;

    /// 最旧的 `n` 个构件，最旧的在前。
    fn oldest_artifacts(&self, n: usize) -> impl Future<Output = Result<Vec<ArtifactInfo>>> + Send;

    /// 删除构件及其全部数据。
    fn delete_artifact_fully(&self, artifact: &ArtifactInfo) -> impl Future<Output = Result<()>> + Send;

    fn list_all_artifacts(&self) -> impl Future<Output = Result<Vec<ArtifactInfo>>> + Send;

    /// 原子地写入快照：读者要么看到旧文件，要么看到完整的新文件。
    fn write_snapshot_atomically(
        &self,
        path: &Path,
        bytes: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;
}
