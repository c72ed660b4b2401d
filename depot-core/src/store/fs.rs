use super::{ArtifactInfo, ArtifactStore};
use crate::error::{DepotError, Result};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{instrument, warn};

/// 基于本地文件系统的构件存储：<data_dir>/artifacts/<name>，快照位于 <data_dir>/state。
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    data_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// 确保基础目录存在。
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.artifacts_dir())?;
        std::fs::create_dir_all(self.state_dir())?;
        Ok(())
    }

    /// 构件目录：<data_dir>/artifacts
    fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.artifacts_dir().join(name)
    }

    /// 默认快照路径：<data_dir>/state/snapshot.json
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir().join("snapshot.json")
    }

    /// 校验构件名，仅允许字母数字/`-`/`_`/`.`，且不能以 `.` 开头
    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name.len() <= 255
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(DepotError::InvalidName(name.to_string()))
        }
    }

    /// 写入构件（先写临时文件再改名），返回其元数据。
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn put_artifact(&self, name: &str, bytes: &[u8]) -> Result<ArtifactInfo> {
        Self::validate_name(name)?;
        tokio::fs::create_dir_all(self.artifacts_dir()).await?;
        let path = self.artifact_path(name);
        write_atomically(&path, bytes).await?;
        artifact_info(name.to_string(), &path).await
    }

    /// 读取构件全部内容。
    #[instrument(skip(self))]
    pub async fn read_artifact(&self, name: &str) -> Result<Vec<u8>> {
        Self::validate_name(name)?;
        match tokio::fs::read(self.artifact_path(name)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DepotError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

impl FsArtifactStore {
    /// 显式设置修改时间，避免文件系统时间精度导致排序不稳定
    #[cfg(test)]
    pub(crate) fn set_artifact_age(&self, name: &str, secs_ago: u64) {
        use std::time::{Duration, SystemTime};
        let file = std::fs::File::options()
            .write(true)
            .open(self.artifact_path(name))
            .unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }
}

impl ArtifactStore for FsArtifactStore {
    async fn total_artifact_count(&self) -> Result<usize> {
        Ok(self.list_all_artifacts().await?.len())
    }

    async fn oldest_artifacts(&self, n: usize) -> Result<Vec<ArtifactInfo>> {
        let mut all = self.list_all_artifacts().await?;
        all.truncate(n);
        Ok(all)
    }

    #[instrument(skip(self, artifact), fields(name = %artifact.name))]
    async fn delete_artifact_fully(&self, artifact: &ArtifactInfo) -> Result<()> {
        Self::validate_name(&artifact.name)?;
        match tokio::fs::remove_file(self.artifact_path(&artifact.name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DepotError::NotFound(artifact.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 列出全部构件，按创建时间从旧到新排序。
    #[instrument(skip(self))]
    async fn list_all_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let dir = self.artifacts_dir();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // 跳过写入中的临时文件
            if name.starts_with('.') {
                continue;
            }
            match artifact_info(name, &entry.path()).await {
                Ok(info) => artifacts.push(info),
                // 列目录与读元数据之间文件可能已被删除
                Err(DepotError::NotFound(name)) => {
                    warn!(artifact = %name, "artifact vanished while listing")
                }
                Err(e) => return Err(e),
            }
        }

        artifacts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(artifacts)
    }

    async fn write_snapshot_atomically(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomically(path, bytes).await
    }
}

async fn artifact_info(name: String, path: &Path) -> Result<ArtifactInfo> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(DepotError::NotFound(name)),
        Err(e) => return Err(e.into()),
    };
    let created_at: DateTime<Utc> = meta.modified()?.into();
    Ok(ArtifactInfo {
        name,
        size: meta.len(),
        created_at,
    })
}

/// 写入同目录下的临时文件后 rename 覆盖目标。
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DepotError::Other(format!("invalid target path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
