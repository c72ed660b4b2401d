use std::time::Duration;

/// 请求类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Fast,
    Slow,
}

impl RequestKind {
    pub(crate) fn from_slow(is_slow: bool) -> Self {
        if is_slow {
            RequestKind::Slow
        } else {
            RequestKind::Fast
        }
    }
}

/// 一次封禁：起始时刻与时长总是同时存在。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ban {
    pub(crate) at: Duration,
    pub(crate) duration: Duration,
}

impl Ban {
    pub(crate) fn is_active(&self, now: Duration) -> bool {
        now.saturating_sub(self.at) <= self.duration
    }

    pub(crate) fn remaining(&self, now: Duration) -> Duration {
        (self.at + self.duration).saturating_sub(now)
    }
}

/// 单个客户端的计数状态，只由 `RequestThrottler` 持有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VisitorState {
    /// 该客户端是否有一次判定正在进行
    pub(crate) check_in_flight: bool,
    pub(crate) last_visit_time: Duration,
    /// 当前计数窗口起点
    pub(crate) check_window_start: Duration,
    pub(crate) fast_count: u32,
    pub(crate) slow_count: u32,
    pub(crate) ban: Option<Ban>,
}

impl VisitorState {
    /// 首次访问：窗口从 `now` 开始，对应类别计 1。
    pub(crate) fn first_visit(now: Duration, kind: RequestKind) -> Self {
        let mut state = Self {
            check_in_flight: false,
            last_visit_time: now,
            check_window_start: now,
            fast_count: 0,
            slow_count: 0,
            ban: None,
        };
        *state.count_mut(kind) = 1;
        state
    }

    pub(crate) fn count_mut(&mut self, kind: RequestKind) -> &mut u32 {
        match kind {
            RequestKind::Fast => &mut self.fast_count,
            RequestKind::Slow => &mut self.slow_count,
        }
    }

    pub(crate) fn impose_ban(&mut self, now: Duration, duration: Duration) {
        self.ban = Some(Ban { at: now, duration });
        self.reset_window(now);
    }

    pub(crate) fn lift_ban(&mut self, now: Duration) {
        self.ban = None;
        self.reset_window(now);
    }

    fn reset_window(&mut self, now: Duration) {
        self.fast_count = 0;
        self.slow_count = 0;
        self.check_window_start = now;
    }

    pub(crate) fn is_stale(&self, now: Duration, threshold: Duration) -> bool {
        now.saturating_sub(self.last_visit_time) > threshold
    }
}
