//! 准入控制与后台维护的配置结构。

use std::time::Duration;

/// 请求节流配置。快/慢两类请求各自独立计数、各自的封禁时长。
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// 窗口内允许的快请求数上限
    pub max_fast_requests_per_window: u32,
    /// 窗口内允许的慢请求数上限（大文件上传/下载）
    pub max_slow_requests_per_window: u32,
    /// 计数窗口长度
    pub window_interval: Duration,
    /// 快请求超限后的封禁时长
    pub fast_ban_duration: Duration,
    /// 慢请求超限后的封禁时长
    pub slow_ban_duration: Duration,
    /// 过期访客清理的最小间隔
    pub stale_visitor_sweep_interval: Duration,
    /// 访客空闲多久视为过期
    pub stale_visitor_threshold: Duration,
    /// 访客数少于该值时不清理
    pub min_visitors_before_sweeping: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_fast_requests_per_window: 60,
            max_slow_requests_per_window: 6,
            window_interval: Duration::from_secs(10),
            fast_ban_duration: Duration::from_secs(30),
            slow_ban_duration: Duration::from_secs(120),
            stale_visitor_sweep_interval: Duration::from_secs(60),
            stale_visitor_threshold: Duration::from_secs(10 * 60),
            min_visitors_before_sweeping: 256,
        }
    }
}

/// 单个合并触发器的配置。
#[derive(Debug, Clone, Copy)]
pub struct TriggerConfig {
    /// 两次非强制执行之间的最小间隔
    pub min_interval: Duration,
}

impl TriggerConfig {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }
}

/// 旧构件清理配置。
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// 构件总数上限，超过后触发清理
    pub max_artifacts: usize,
    /// 每轮清理删除的百分比（按总数计，最旧优先）
    pub sweep_percent: u8,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_artifacts: 1000,
            sweep_percent: 25,
        }
    }
}
