//! 后台补充任务：每个密钥一个任务，两个独立定时器分别补满每秒/每日配额。

use crate::error::AppError;
use crate::quota_pool::key::ApiKey;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// 补充任务的停止句柄。
#[derive(Debug)]
pub(crate) struct ReplenishHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReplenishHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
        // 任务可能正阻塞在很长的每日定时器上，直接 abort 保证不会再被调度。
        self.task.abort();
    }
}

/// 启动补充任务。第一次补充发生在创建后一个周期，而不是立即。
///
/// 任务只持有 `Weak`：密钥被释放后任务在下一次触发时自行退出。
/// 定时器在调用方线程上创建，运行时未启用时间驱动时直接返回配置错误。
pub(crate) fn spawn(
    runtime: &Handle,
    key: Weak<ApiKey>,
    second_period: Duration,
    day_period: Duration,
) -> Result<ReplenishHandle, AppError> {
    // 窗口从密钥创建时刻起算，而不是任务首次被调度的时刻。
    let start = Instant::now();
    let (mut second, mut day) = build_intervals(runtime, start, second_period, day_period)?;

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = runtime.spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = second.tick() => {
                    let Some(key) = key.upgrade() else { break };
                    key.replenish_second();
                }
                _ = day.tick() => {
                    let Some(key) = key.upgrade() else { break };
                    key.replenish_day();
                }
            }
        }
    });

    Ok(ReplenishHandle {
        stop: stop_tx,
        task,
    })
}

/// tokio 在缺少时间驱动时只会 panic，这里把它转换成错误。
fn build_intervals(
    runtime: &Handle,
    start: Instant,
    second_period: Duration,
    day_period: Duration,
) -> Result<(Interval, Interval), AppError> {
    let _guard = runtime.enter();
    panic::catch_unwind(AssertUnwindSafe(|| {
        (
            window_interval(start, second_period),
            window_interval(start, day_period),
        )
    }))
    .map_err(|_| AppError::config("Tokio 运行时未启用定时器（需要 enable_time）"))
}

fn window_interval(start: Instant, period: Duration) -> Interval {
    // 按限额放大的每日周期可能长达数千年，截断到一个足够远的上限。
    let period = period.clamp(Duration::from_millis(1), FAR_FUTURE);
    let first = start.checked_add(period).unwrap_or(start);
    let mut interval = tokio::time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
