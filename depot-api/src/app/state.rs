use depot_core::{
    Clock, CoalescingTrigger, FsArtifactStore, RequestThrottler, RetentionConfig, RetentionJob,
    SnapshotJob, SnapshotReason, ThrottleConfig, TriggerConfig,
};
use std::sync::Arc;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FsArtifactStore>,
    /// 按客户端 IP 的请求节流
    pub throttler: Arc<RequestThrottler>,
    /// 上传完成后触发旧构件清理
    pub retention: Arc<CoalescingTrigger<()>>,
    /// 状态快照（定时 + 运维强制）
    pub snapshots: Arc<CoalescingTrigger<SnapshotReason>>,
    /// 运维 token，未配置时禁用 /admin 接口
    pub admin_token: Option<String>,
    /// 是否信任反向代理写入的 X-Real-IP / X-Forwarded-For
    pub trust_proxy_headers: bool,
}

/// 构建 [`AppState`] 所需的配置集合。
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub throttle: ThrottleConfig,
    pub retention: RetentionConfig,
    pub retention_trigger: TriggerConfig,
    pub snapshot_trigger: TriggerConfig,
    pub admin_token: Option<String>,
    pub trust_proxy_headers: bool,
}

impl AppState {
    /// 创建节流器并为两个维护任务各启动一个工作线程。
    pub fn new(
        store: Arc<FsArtifactStore>,
        config: StateConfig,
        clock: Arc<dyn Clock>,
    ) -> depot_core::Result<Self> {
        let throttler = Arc::new(RequestThrottler::new(config.throttle, clock.clone()));

        let retention = CoalescingTrigger::spawn(
            "retention",
            config.retention_trigger,
            clock.clone(),
            RetentionJob::new(store.clone(), config.retention),
        )?;

        let snapshots = CoalescingTrigger::spawn(
            "snapshot",
            config.snapshot_trigger,
            clock,
            SnapshotJob::new(store.clone(), store.snapshot_path()),
        )?;

        Ok(Self {
            store,
            throttler,
            retention: Arc::new(retention),
            snapshots: Arc::new(snapshots),
            admin_token: config.admin_token,
            trust_proxy_headers: config.trust_proxy_headers,
        })
    }
}
