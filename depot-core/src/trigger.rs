//! 合并触发器：把任意线程发来的"请执行维护"信号合并到容量为 1 的槽位，
//! 由唯一的后台线程串行执行维护函数。
//!
//! 槽位已有未消费的信号时新信号直接覆盖（后写者胜）。工作线程每取出一个信号，
//! 若距上次执行不足 `min_interval` 且信号非强制，则丢弃该信号。

use crate::clock::Clock;
use crate::config::TriggerConfig;
use crate::error::Result;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// 由合并触发器驱动的维护任务。
///
/// 任务在工作线程独占的单线程运行时上执行，返回的 future 不要求 `Send`。
pub trait Maintenance<P>: Send + 'static {
    fn run(&mut self, param: P) -> impl Future<Output = Result<()>>;
}

impl<P, F, Fut> Maintenance<P> for F
where
    F: FnMut(P) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>>,
{
    fn run(&mut self, param: P) -> impl Future<Output = Result<()>> {
        (self)(param)
    }
}

#[derive(Debug)]
struct Signal<P> {
    param: P,
    forced: bool,
}

#[derive(Debug)]
struct Slot<P> {
    pending: Option<Signal<P>>,
    closed: bool,
}

#[derive(Debug)]
struct Shared<P> {
    slot: Mutex<Slot<P>>,
    wake: Notify,
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

impl<P> Shared<P> {
    fn slot(&self) -> MutexGuard<'_, Slot<P>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        {
            let mut slot = self.slot();
            slot.closed = true;
            slot.pending = None;
        }
        self.wake.notify_one();
    }

    /// 等待下一个信号；槽位关闭后返回 `None`。
    async fn next_signal(&self) -> Option<Signal<P>> {
        loop {
            let notified = self.wake.notified();
            {
                let mut slot = self.slot();
                if let Some(signal) = slot.pending.take() {
                    return Some(signal);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// 触发器运行统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    /// 维护函数被执行的次数（含失败）
    pub runs: u64,
    /// 因最小间隔被丢弃的信号数
    pub skipped: u64,
    /// 返回错误或 panic 的执行次数
    pub failures: u64,
    /// 覆盖了未消费信号的触发次数
    pub coalesced: u64,
}

/// 合并触发器句柄。丢弃句柄或调用 [`shutdown`](Self::shutdown) 会结束工作线程。
#[derive(Debug)]
pub struct CoalescingTrigger<P> {
    name: &'static str,
    shared: Arc<Shared<P>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> CoalescingTrigger<P> {
    /// 启动专用工作线程并返回触发句柄。
    pub fn spawn<M>(
        name: &'static str,
        config: TriggerConfig,
        clock: Arc<dyn Clock>,
        job: M,
    ) -> Result<Self>
    where
        M: Maintenance<P>,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
            }),
            wake: Notify::new(),
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("{name}-maintenance"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(trigger = name, error = %e, "failed to build maintenance runtime");
                        return;
                    }
                };
                runtime.block_on(worker_loop(
                    name,
                    worker_shared,
                    job,
                    clock,
                    config.min_interval,
                ));
            })?;

        info!(trigger = name, min_interval_ms = config.min_interval.as_millis() as u64, "maintenance worker started");
        Ok(Self {
            name,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// 非阻塞地请求一次维护，受最小间隔约束。
    pub fn trigger(&self, param: P) {
        self.signal(param, false);
    }

    /// 请求一次绕过最小间隔的维护。不会中断正在进行的执行。
    pub fn trigger_forced(&self, param: P) {
        self.signal(param, true);
    }

    fn signal(&self, param: P, forced: bool) {
        {
            let mut slot = self.shared.slot();
            if slot.closed {
                debug!(trigger = self.name, "trigger ignored, worker is shut down");
                return;
            }
            // 被覆盖的强制信号保持强制
            let forced = forced || slot.pending.as_ref().is_some_and(|s| s.forced);
            if slot.pending.replace(Signal { param, forced }).is_some() {
                self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.shared.wake.notify_one();
    }
}

impl<P> CoalescingTrigger<P> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            runs: self.shared.runs.load(Ordering::SeqCst),
            skipped: self.shared.skipped.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
            coalesced: self.shared.coalesced.load(Ordering::SeqCst),
        }
    }

    /// 工作线程是否仍在运行。
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// 关闭槽位；工作线程处理完当前执行后退出。未消费的信号被丢弃。
    pub fn shutdown(&self) {
        self.shared.close();
    }
}

impl<P> Drop for CoalescingTrigger<P> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

async fn worker_loop<P, M>(
    name: &'static str,
    shared: Arc<Shared<P>>,
    mut job: M,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
) where
    M: Maintenance<P>,
{
    let mut last_run_at: Option<Duration> = None;

    while let Some(signal) = shared.next_signal().await {
        let now = clock.now();
        if !signal.forced {
            if let Some(last) = last_run_at {
                // 间隔溢出视为永不到期
                if now < last.saturating_add(min_interval) {
                    shared.skipped.fetch_add(1, Ordering::SeqCst);
                    debug!(trigger = name, "maintenance skipped, min interval not elapsed");
                    continue;
                }
            }
        }

        debug!(trigger = name, forced = signal.forced, "maintenance run starting");
        let param = signal.param;
        let runner = &mut job;
        let outcome = AssertUnwindSafe(async move { runner.run(param).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                error!(trigger = name, error = %e, "maintenance run failed");
            }
            Err(panic) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                error!(trigger = name, panic = %panic_message(&panic), "maintenance run panicked");
            }
        }
        last_run_at = Some(now);
        shared.runs.fetch_add(1, Ordering::SeqCst);
    }

    error!(trigger = name, "maintenance worker stopped; no further maintenance will run");
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
