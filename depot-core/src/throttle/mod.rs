//! 按客户端的请求节流：滑动窗口计数 + 临时封禁。
//!
//! 判定采用两段短临界区：第一次加锁取出状态副本并置 `check_in_flight`，
//! 解锁后在副本上计算，第二次加锁写回。同一客户端在判定进行中再次到达的请求
//! 直接判为节流，不排队等待。

mod sweep;
mod visitor;

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

use visitor::{RequestKind, VisitorState};

/// 受锁保护的访客表及上次清理时刻。
#[derive(Debug)]
struct Visitors {
    map: HashMap<String, VisitorState>,
    last_sweep_at: Duration,
}

/// 请求节流器：持有全部访客状态，外部只能通过本类型的 API 访问。
#[derive(Debug)]
pub struct RequestThrottler {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    visitors: Mutex<Visitors>,
}

impl RequestThrottler {
    pub fn new(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        let last_sweep_at = clock.now();
        Self {
            config,
            clock,
            visitors: Mutex::new(Visitors {
                map: HashMap::new(),
                last_sweep_at,
            }),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// 判定本次请求是否应被节流，并更新该客户端的计数。
    ///
    /// 首次出现的客户端总是放行。`client_id` 为空属于调用方违约，直接 panic。
    pub fn should_throttle(&self, client_id: &str, is_slow: bool) -> bool {
        assert!(!client_id.is_empty(), "client identifier must not be empty");
        let kind = RequestKind::from_slow(is_slow);
        let now = self.clock.now();

        let mut state = {
            let mut visitors = self.lock();
            match visitors.map.entry(client_id.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert(VisitorState::first_visit(now, kind));
                    return false;
                }
                Entry::Occupied(mut slot) => {
                    let shared = slot.get_mut();
                    shared.last_visit_time = now;
                    if shared.check_in_flight {
                        // 同一客户端的判定尚未完成，按节流处理
                        return true;
                    }
                    shared.check_in_flight = true;
                    shared.clone()
                }
            }
        };

        let throttled = self.decide(client_id, &mut state, now, kind);

        let mut visitors = self.lock();
        state.check_in_flight = false;
        match visitors.map.get_mut(client_id) {
            Some(shared) => {
                state.last_visit_time = state.last_visit_time.max(shared.last_visit_time);
                *shared = state;
            }
            None => {
                visitors.map.insert(client_id.to_owned(), state);
            }
        }
        self.sweep_stale_visitors(&mut visitors, now);
        throttled
    }

    /// 剩余封禁时间；未知客户端、未封禁或封禁已过期时为零。
    pub fn remaining_ban_time(&self, client_id: &str) -> Duration {
        let now = self.clock.now();
        self.lock()
            .map
            .get(client_id)
            .and_then(|state| state.ban)
            .filter(|ban| ban.is_active(now))
            .map(|ban| ban.remaining(now))
            .unwrap_or(Duration::ZERO)
    }

    /// 当前跟踪的客户端数量。
    pub fn tracked_visitors(&self) -> usize {
        self.lock().map.len()
    }

    /// 在副本上计算判定结果，不持有锁。
    fn decide(&self, client_id: &str, state: &mut VisitorState, now: Duration, kind: RequestKind) -> bool {
        if let Some(ban) = state.ban {
            if ban.is_active(now) {
                return true;
            }
            state.lift_ban(now);
        }

        let (ceiling, ban_duration) = match kind {
            RequestKind::Fast => (
                self.config.max_fast_requests_per_window,
                self.config.fast_ban_duration,
            ),
            RequestKind::Slow => (
                self.config.max_slow_requests_per_window,
                self.config.slow_ban_duration,
            ),
        };

        let count = state.count_mut(kind);
        *count += 1;
        if *count <= ceiling {
            return false;
        }

        if now.saturating_sub(state.check_window_start) < self.config.window_interval {
            state.impose_ban(now, ban_duration);
            warn!(
                client = %client_id,
                kind = ?kind,
                ban_ms = ban_duration.as_millis() as u64,
                "client exceeded request ceiling, banned"
            );
            true
        } else {
            // 窗口已过：重新开窗，本次不计
            state.check_window_start = now;
            *state.count_mut(kind) = 0;
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Visitors> {
        self.visitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn visitor(&self, client_id: &str) -> Option<VisitorState> {
        self.lock().map.get(client_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use std::sync::Barrier;
    use std::thread;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn config(max_fast: u32, max_slow: u32, window: Duration) -> ThrottleConfig {
        ThrottleConfig {
            max_fast_requests_per_window: max_fast,
            max_slow_requests_per_window: max_slow,
            window_interval: window,
            fast_ban_duration: ms(5),
            slow_ban_duration: ms(50),
            stale_visitor_sweep_interval: Duration::from_secs(3600),
            stale_visitor_threshold: Duration::from_secs(3600),
            min_visitors_before_sweeping: 1000,
        }
    }

    fn manual(config: ThrottleConfig) -> (RequestThrottler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RequestThrottler::new(config, clock.clone()), clock)
    }

    #[test]
    fn first_contact_is_admitted() {
        let (throttler, _) = manual(config(0, 0, ms(10)));
        assert!(!throttler.should_throttle("10.0.0.1", false));
        assert!(!throttler.should_throttle("10.0.0.2", true));
        assert_eq!(throttler.tracked_visitors(), 2);
    }

    #[test]
    #[should_panic(expected = "client identifier must not be empty")]
    fn empty_client_id_is_fatal() {
        let (throttler, _) = manual(config(10, 10, ms(10)));
        throttler.should_throttle("", false);
    }

    #[test]
    fn eleventh_fast_call_is_banned_until_expiry() {
        let (throttler, clock) = manual(config(10, 5, ms(10)));

        let mut results = Vec::new();
        for i in 0..11 {
            if i > 0 {
                clock.advance(Duration::from_micros(900));
            }
            results.push(throttler.should_throttle("1", false));
        }
        assert_eq!(results.iter().filter(|t| **t).count(), 1);
        assert!(results[10]);

        // 立即再来一次仍在封禁中
        assert!(throttler.should_throttle("1", false));

        clock.advance(ms(6));
        assert!(!throttler.should_throttle("1", false));
    }

    #[test]
    fn expired_ban_counts_only_the_new_call() {
        let (throttler, clock) = manual(config(2, 5, ms(100)));
        for _ in 0..3 {
            throttler.should_throttle("c", false);
        }
        assert_eq!(throttler.remaining_ban_time("c"), ms(5));

        clock.advance(ms(5) + Duration::from_micros(1));
        assert!(!throttler.should_throttle("c", false));
        let state = throttler.visitor("c").unwrap();
        assert!(state.ban.is_none());
        assert_eq!(state.fast_count, 1);
        assert_eq!(state.slow_count, 0);
        assert_eq!(throttler.remaining_ban_time("c"), Duration::ZERO);
    }

    #[test]
    fn categories_count_independently() {
        let (throttler, clock) = manual(config(3, 2, ms(100)));
        // 三快两慢，各自都未超限
        let calls = [false, true, false, true, false];
        for is_slow in calls {
            clock.advance(ms(1));
            assert!(!throttler.should_throttle("c", is_slow));
        }
        let state = throttler.visitor("c").unwrap();
        assert_eq!((state.fast_count, state.slow_count), (3, 2));

        // 第三个慢请求触发慢封禁，使用慢封禁时长
        clock.advance(ms(1));
        assert!(throttler.should_throttle("c", true));
        assert_eq!(throttler.remaining_ban_time("c"), ms(50));

        // 封禁期间快请求同样被拒
        clock.advance(ms(10));
        assert!(throttler.should_throttle("c", false));
        assert_eq!(throttler.remaining_ban_time("c"), ms(40));
    }

    #[test]
    fn elapsed_window_restarts_instead_of_banning() {
        let (throttler, clock) = manual(config(2, 2, ms(10)));
        assert!(!throttler.should_throttle("c", false));
        clock.advance(ms(1));
        assert!(!throttler.should_throttle("c", false));
        clock.advance(ms(19));
        // 超过上限但窗口已过：重开窗口
        assert!(!throttler.should_throttle("c", false));
        let state = throttler.visitor("c").unwrap();
        assert_eq!(state.check_window_start, ms(20));
        assert_eq!(state.fast_count, 0);

        for _ in 0..2 {
            clock.advance(ms(1));
            assert!(!throttler.should_throttle("c", false));
        }
        clock.advance(ms(1));
        assert!(throttler.should_throttle("c", false));
    }

    #[test]
    fn remaining_ban_time_for_unknown_client_is_zero() {
        let (throttler, _) = manual(config(1, 1, ms(10)));
        assert_eq!(throttler.remaining_ban_time("nobody"), Duration::ZERO);
        throttler.should_throttle("someone", false);
        assert_eq!(throttler.remaining_ban_time("someone"), Duration::ZERO);
    }

    #[test]
    fn overlapping_decision_fails_closed() {
        let (throttler, _) = manual(config(10, 10, ms(10)));
        throttler.should_throttle("c", false);
        throttler.lock().map.get_mut("c").unwrap().check_in_flight = true;
        assert!(throttler.should_throttle("c", false));
        // 被拒的重叠请求不计数
        assert_eq!(throttler.visitor("c").unwrap().fast_count, 1);
    }

    #[test]
    fn concurrent_calls_for_new_client_are_all_accounted() {
        const CALLS: usize = 64;
        const CEILING: u32 = 5;
        let throttler = Arc::new(RequestThrottler::new(
            config(CEILING, CEILING, Duration::from_secs(60)),
            Arc::new(MonotonicClock::new()),
        ));
        let barrier = Arc::new(Barrier::new(CALLS));

        let handles: Vec<_> = (0..CALLS)
            .map(|_| {
                let throttler = throttler.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    throttler.should_throttle("hammer", false)
                })
            })
            .collect();
        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let admitted = outcomes.iter().filter(|t| !**t).count();
        let throttled = outcomes.iter().filter(|t| **t).count();
        assert_eq!(admitted + throttled, CALLS);
        assert!(admitted >= 1);
        assert!(admitted <= CEILING as usize);
        assert!(!throttler.visitor("hammer").unwrap().check_in_flight);
    }
}
