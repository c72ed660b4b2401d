//! 旧构件清理：总数超过上限时按比例删除最旧的构件。

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::store::ArtifactStore;
use crate::trigger::Maintenance;
use std::sync::Arc;
use tracing::{info, warn};

/// 单轮清理结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub total: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct RetentionJob<S> {
    store: Arc<S>,
    config: RetentionConfig,
}

impl<S: ArtifactStore> RetentionJob<S> {
    pub fn new(store: Arc<S>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// 执行一轮清理。单个构件删除失败只记录日志，不中断本轮。
    pub async fn sweep(&self) -> Result<RetentionOutcome> {
        let total = self.store.total_artifact_count().await?;
        let mut outcome = RetentionOutcome {
            total,
            ..Default::default()
        };
        if total <= self.config.max_artifacts {
            return Ok(outcome);
        }

        let batch = (total * usize::from(self.config.sweep_percent) / 100).max(1);
        for artifact in self.store.oldest_artifacts(batch).await? {
            match self.store.delete_artifact_fully(&artifact).await {
                Ok(()) => outcome.deleted += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(artifact = %artifact.name, error = %e, "failed to delete old artifact");
                }
            }
        }

        info!(
            total,
            deleted = outcome.deleted,
            failed = outcome.failed,
            max = self.config.max_artifacts,
            "retention sweep finished"
        );
        Ok(outcome)
    }
}

impl<S: ArtifactStore> Maintenance<()> for RetentionJob<S> {
    async fn run(&mut self, _param: ()) -> Result<()> {
        self.sweep().await.map(|_| ())
    }
}
