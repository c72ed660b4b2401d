mod app;

use anyhow::Context;
use app::{app_router, AppState, StateConfig};
use depot_core::{
    FsArtifactStore, MaintenanceScheduler, MonotonicClock, RetentionConfig, SnapshotReason,
    ThrottleConfig, TriggerConfig,
};
use dotenvy::dotenv;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
struct ApiConfig {
    bind: SocketAddr,
    data_dir: PathBuf,
    /// 运维 token（/admin 接口）
    admin_token: Option<String>,
    /// 仅在反向代理之后部署时开启
    trust_proxy_headers: bool,
    throttle: ThrottleConfig,
    retention: RetentionConfig,
    /// 两次清理之间的最小间隔
    retention_min_interval: Duration,
    /// 两次定时快照之间的最小间隔
    snapshot_min_interval: Duration,
    /// 定时快照的 cron 表达式
    snapshot_cron: String,
}

/// 读取并解析环境变量；缺失或无法解析时返回 None（解析失败会告警）。
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

impl ApiConfig {
    fn from_env() -> anyhow::Result<Self> {
        let bind = env_parse("DEPOT_BIND")
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let data_dir = env::var("DEPOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        // 运维 token 建议长度 >= 32
        let admin_token = env::var("DEPOT_ADMIN_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(token) = &admin_token {
            anyhow::ensure!(
                token.len() >= 32,
                "admin token is too short (<32); use a strong random value in DEPOT_ADMIN_TOKEN"
            );
        }

        let trust_proxy_headers = env_parse("DEPOT_TRUST_PROXY_HEADERS").unwrap_or(false);

        let defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            max_fast_requests_per_window: env_parse("DEPOT_MAX_FAST_REQUESTS")
                .unwrap_or(defaults.max_fast_requests_per_window),
            max_slow_requests_per_window: env_parse("DEPOT_MAX_SLOW_REQUESTS")
                .unwrap_or(defaults.max_slow_requests_per_window),
            window_interval: env_millis("DEPOT_WINDOW_MS").unwrap_or(defaults.window_interval),
            fast_ban_duration: env_millis("DEPOT_FAST_BAN_MS")
                .unwrap_or(defaults.fast_ban_duration),
            slow_ban_duration: env_millis("DEPOT_SLOW_BAN_MS")
                .unwrap_or(defaults.slow_ban_duration),
            ..defaults
        };

        let retention_defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            max_artifacts: env_parse("DEPOT_MAX_ARTIFACTS")
                .unwrap_or(retention_defaults.max_artifacts),
            sweep_percent: env_parse::<u8>("DEPOT_RETENTION_PERCENT")
                .filter(|p| (1..=100).contains(p))
                .unwrap_or(retention_defaults.sweep_percent),
        };

        let snapshot_cron =
            env::var("DEPOT_SNAPSHOT_CRON").unwrap_or_else(|_| "0 */10 * * * *".into());
        MaintenanceScheduler::validate_cron(&snapshot_cron)?;

        Ok(Self {
            bind,
            data_dir,
            admin_token,
            trust_proxy_headers,
            throttle,
            retention,
            retention_min_interval: env_secs("DEPOT_RETENTION_MIN_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(60)),
            snapshot_min_interval: env_secs("DEPOT_SNAPSHOT_MIN_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(300)),
            snapshot_cron,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 优先读取 .env（若存在）
    let _ = dotenv();
    init_tracing();

    let config = ApiConfig::from_env()?;
    info!("starting depot on {}", config.bind);

    let store = Arc::new(FsArtifactStore::new(&config.data_dir));
    store.ensure_dirs().context("failed to create data directories")?;

    let state = AppState::new(
        store,
        StateConfig {
            throttle: config.throttle.clone(),
            retention: config.retention,
            retention_trigger: TriggerConfig::new(config.retention_min_interval),
            snapshot_trigger: TriggerConfig::new(config.snapshot_min_interval),
            admin_token: config.admin_token.clone(),
            trust_proxy_headers: config.trust_proxy_headers,
        },
        Arc::new(MonotonicClock::new()),
    )?;

    if state.admin_token.is_none() {
        warn!("DEPOT_ADMIN_TOKEN not set; /admin endpoints are disabled");
    }

    // 启动时补一次清理，覆盖上次退出前未完成的情况
    state.retention.trigger(());

    let scheduler = MaintenanceScheduler::start().await?;
    if let Err(e) = scheduler
        .schedule(
            "snapshot",
            &config.snapshot_cron,
            state.snapshots.clone(),
            SnapshotReason::Timer,
        )
        .await
    {
        tracing::error!(error = %e, "failed to schedule periodic snapshots");
    }

    let app = app_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down maintenance workers");
    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "failed to stop scheduler");
    }
    state.retention.shutdown();
    state.snapshots.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
