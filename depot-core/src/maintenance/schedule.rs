//! 定时调度器：按 cron 表达式向合并触发器发送非强制信号。

use crate::error::{DepotError, Result};
use crate::trigger::CoalescingTrigger;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::info;
use uuid::Uuid;

fn scheduler_error(action: &'static str) -> impl FnOnce(JobSchedulerError) -> DepotError {
    move |e| DepotError::Other(format!("scheduler failed to {action}: {e}"))
}

/// 解析六段式 cron 表达式 (秒 分 时 日 月 周)
fn parse_cron(expr: &str) -> Result<Schedule> {
    expr.parse::<Schedule>()
        .map_err(|e| DepotError::InvalidSchedule(format!("'{expr}': {e}")))
}

/// 维护任务的定时器。任务名唯一，重复调度会替换旧任务。
pub struct MaintenanceScheduler {
    inner: JobScheduler,
    jobs: Mutex<BTreeMap<String, Uuid>>,
}

impl MaintenanceScheduler {
    pub async fn start() -> Result<Self> {
        let inner = JobScheduler::new().await.map_err(scheduler_error("initialize"))?;
        inner.start().await.map_err(scheduler_error("start"))?;
        info!("maintenance scheduler started");
        Ok(Self {
            inner,
            jobs: Mutex::new(BTreeMap::new()),
        })
    }

    /// 按 cron 定时向 `trigger` 发送 `param`。
    pub async fn schedule<P>(
        &self,
        name: &str,
        cron: &str,
        trigger: Arc<CoalescingTrigger<P>>,
        param: P,
    ) -> Result<()>
    where
        P: Clone + Send + Sync + 'static,
    {
        parse_cron(cron)?;
        let job = Job::new_async(cron, move |_id, _lock| {
            trigger.trigger(param.clone());
            Box::pin(async {})
        })
        .map_err(scheduler_error("build job"))?;
        let id = self.inner.add(job).await.map_err(scheduler_error("add job"))?;

        let replaced = self.jobs.lock().await.insert(name.to_string(), id);
        if let Some(old) = replaced {
            self.inner.remove(&old).await.map_err(scheduler_error("remove job"))?;
        }
        info!(job = name, cron, replaced = replaced.is_some(), "maintenance schedule added");
        Ok(())
    }

    /// 移除定时任务；返回该任务是否存在。
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let Some(id) = self.jobs.lock().await.remove(name) else {
            return Ok(false);
        };
        self.inner.remove(&id).await.map_err(scheduler_error("remove job"))?;
        info!(job = name, "maintenance schedule removed");
        Ok(true)
    }

    /// 已注册的任务名（有序）
    pub async fn list(&self) -> Vec<String> {
        self.jobs.lock().await.keys().cloned().collect()
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(scheduler_error("shut down"))?;
        info!("maintenance scheduler stopped");
        Ok(())
    }

    pub fn validate_cron(cron: &str) -> Result<()> {
        parse_cron(cron).map(drop)
    }

    pub fn next_run(cron: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(parse_cron(cron)?.upcoming(Utc).next())
    }
}
