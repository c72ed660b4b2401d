//! 过期访客清理：随机抽样约三分之一的访客，移除其中空闲过久的条目。

use super::*;
use rand::Rng;
use tracing::debug;

impl RequestThrottler {
    /// 调用方已持有锁。每个清理间隔最多执行一次。
    pub(super) fn sweep_stale_visitors(&self, visitors: &mut Visitors, now: Duration) {
        if now.saturating_sub(visitors.last_sweep_at) < self.config.stale_visitor_sweep_interval {
            return;
        }
        visitors.last_sweep_at = now;

        let tracked = visitors.map.len();
        let floor = self.config.min_visitors_before_sweeping;
        if tracked < floor {
            return;
        }

        // 清理后不低于 floor
        let mut removable = tracked - floor;
        let threshold = self.config.stale_visitor_threshold;
        let mut rng = rand::thread_rng();
        visitors.map.retain(|_, state| {
            if removable == 0 || state.check_in_flight || !rng.gen_ratio(1, 3) {
                return true;
            }
            if state.is_stale(now, threshold) {
                removable -= 1;
                false
            } else {
                true
            }
        });

        debug!(
            tracked,
            removed = tracked - visitors.map.len(),
            "stale visitor sweep finished"
        );
    }
}
