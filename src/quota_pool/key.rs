use crate::credential::KeyConfig;
use crate::error::{AppError, QuotaError, QuotaWindow};
use crate::logging::mask_secret;
use crate::quota_pool::replenisher::{self, ReplenishHandle};
use crate::quota_pool::types::{KeySnapshot, WindowPolicy};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 一个带每秒/每日配额的 API 密钥。
///
/// 剩余配额由单把锁保护；`consume`、补充与观察方法互斥。创建时即启动后台补充任务，
/// `shutdown` 或最后一个引用被释放时停止。
#[derive(Debug)]
pub struct ApiKey {
    key: String,
    masked_key: String,
    max_per_day: u32,
    max_per_second: u32,
    remaining: Mutex<Remaining>,
    replenisher: Mutex<Option<ReplenishHandle>>,
}

#[derive(Debug, Clone, Copy)]
struct Remaining {
    day: u32,
    second: u32,
    /// 关闭后补充一律忽略，即使后台任务恰好在关闭的同时被唤醒。
    closed: bool,
}

impl ApiKey {
    /// 创建密钥并立即开始后台补充。必须在 Tokio 运行时内调用。
    pub fn new(config: &KeyConfig, policy: WindowPolicy) -> Result<Arc<Self>, AppError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| AppError::config("创建 API 密钥需要在 Tokio 运行时中进行"))?;

        let key = Arc::new(Self {
            key: config.key.clone(),
            masked_key: mask_secret(&config.key),
            max_per_day: config.call_per_day,
            max_per_second: config.call_per_second,
            remaining: Mutex::new(Remaining {
                day: config.call_per_day,
                second: config.call_per_second,
                closed: false,
            }),
            replenisher: Mutex::new(None),
        });

        let handle = replenisher::spawn(
            &runtime,
            Arc::downgrade(&key),
            policy.second_period(config.call_per_second),
            policy.day_period(config.call_per_day),
        )?;
        *key.replenisher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::debug!(
            key = %key.masked_key,
            per_day = key.max_per_day,
            per_second = key.max_per_second,
            "API 密钥已加载"
        );
        Ok(key)
    }

    /// 消耗一次调用：每秒与每日配额都大于 0 时两者各减 1 并返回 key；否则不改动任何计数。
    pub fn consume(&self) -> Result<&str, QuotaError> {
        let mut r = self.lock_remaining();
        if r.second == 0 {
            return Err(self.exhausted(QuotaWindow::Second));
        }
        if r.day == 0 {
            return Err(self.exhausted(QuotaWindow::Day));
        }
        r.second -= 1;
        r.day -= 1;
        Ok(&self.key)
    }

    pub fn has_capacity(&self) -> bool {
        let r = self.lock_remaining();
        r.second > 0 && r.day > 0
    }

    pub fn remaining_day(&self) -> u32 {
        self.lock_remaining().day
    }

    pub fn remaining_second(&self) -> u32 {
        self.lock_remaining().second
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn max_per_second(&self) -> u32 {
        self.max_per_second
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn masked_key(&self) -> &str {
        &self.masked_key
    }

    pub fn snapshot(&self) -> KeySnapshot {
        let r = *self.lock_remaining();
        KeySnapshot {
            masked_key: self.masked_key.clone(),
            max_per_day: self.max_per_day,
            max_per_second: self.max_per_second,
            remaining_day: r.day,
            remaining_second: r.second,
        }
    }

    /// 停止后台补充。重复调用无副作用；关闭后剩余配额不再变化（除非继续 consume）。
    pub fn shutdown(&self) {
        self.lock_remaining().closed = true;
        let handle = self
            .replenisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
            tracing::debug!(key = %self.masked_key, "API 密钥已关闭");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock_remaining().closed
    }

    pub(crate) fn replenish_second(&self) {
        let mut r = self.lock_remaining();
        if r.closed {
            return;
        }
        r.second = self.max_per_second;
        tracing::trace!(key = %self.masked_key, "每秒配额已补满");
    }

    pub(crate) fn replenish_day(&self) {
        let mut r = self.lock_remaining();
        if r.closed {
            return;
        }
        r.day = self.max_per_day;
        tracing::debug!(key = %self.masked_key, "每日配额已补满");
    }

    fn exhausted(&self, window: QuotaWindow) -> QuotaError {
        QuotaError::QuotaExhausted {
            key: self.masked_key.clone(),
            window,
        }
    }

    fn lock_remaining(&self) -> MutexGuard<'_, Remaining> {
        // 临界区内只有整数赋值，不会留下半更新状态，中毒时直接取回数据。
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        let slot = self
            .replenisher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(key: &str, per_day: u32, per_second: u32) -> KeyConfig {
        KeyConfig {
            key: key.to_string(),
            call_per_day: per_day,
            call_per_second: per_second,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn allows_exactly_per_second_limit() {
        let k = ApiKey::new(&config("abcdefgh", 100, 3), WindowPolicy::ScaledByLimit).unwrap();

        for _ in 0..3 {
            assert_eq!(k.consume().unwrap(), "abcdefgh");
        }
        let err = k.consume().unwrap_err();
        assert_eq!(err.window(), Some(QuotaWindow::Second));
        assert_eq!(k.remaining_second(), 0);
        assert_eq!(k.remaining_day(), 97);
        assert!(!k.has_capacity());

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn day_exhaustion_leaves_second_untouched() {
        let k = ApiKey::new(&config("abcdefgh", 1, 5), WindowPolicy::ScaledByLimit).unwrap();

        assert!(k.consume().is_ok());
        let err = k.consume().unwrap_err();
        assert_eq!(err.window(), Some(QuotaWindow::Day));
        assert_eq!(k.remaining_second(), 4);
        assert_eq!(k.remaining_day(), 0);

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_key_recovers_after_one_second() {
        let k = ApiKey::new(&config("hahaha", 1 << 10, 1), WindowPolicy::ScaledByLimit).unwrap();

        assert!(k.consume().is_ok(), "第一次调用应当成功");
        let err = k.consume().unwrap_err();
        assert!(matches!(
            err,
            QuotaError::QuotaExhausted {
                window: QuotaWindow::Second,
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(1_010)).await;

        assert!(k.consume().is_ok(), "等待一秒后不应再被限流");
        assert_eq!(k.remaining_day(), 1022);

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn second_window_scales_with_limit() {
        let k = ApiKey::new(&config("abcdefgh", 100, 2), WindowPolicy::ScaledByLimit).unwrap();
        k.consume().unwrap();
        k.consume().unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(k.remaining_second(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(k.remaining_second(), 2);
        assert_eq!(k.remaining_day(), 98);

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_replenishes_every_second() {
        let k = ApiKey::new(&config("abcdefgh", 100, 2), WindowPolicy::Fixed).unwrap();
        k.consume().unwrap();
        k.consume().unwrap();

        tokio::time::sleep(Duration::from_millis(1_010)).await;
        assert_eq!(k.remaining_second(), 2);

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn day_window_replenishes_after_scaled_days() {
        let k = ApiKey::new(&config("abcdefgh", 2, 100), WindowPolicy::ScaledByLimit).unwrap();
        k.consume().unwrap();
        k.consume().unwrap();
        assert_eq!(k.remaining_day(), 0);

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert_eq!(k.remaining_day(), 0);

        tokio::time::sleep(Duration::from_secs(86_400 + 1)).await;
        assert_eq!(k.remaining_day(), 2);

        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_replenishment() {
        let k = ApiKey::new(&config("abcdefgh", 10, 1), WindowPolicy::ScaledByLimit).unwrap();
        k.consume().unwrap();
        k.shutdown();
        assert!(k.is_shutdown());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(k.remaining_second(), 0);
        assert_eq!(k.remaining_day(), 9);

        // 关闭后的手动补充同样无效
        k.replenish_second();
        assert_eq!(k.remaining_second(), 0);

        // 重复关闭无副作用
        k.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn replenish_never_exceeds_max() {
        let k = ApiKey::new(&config("abcdefgh", 10, 4), WindowPolicy::ScaledByLimit).unwrap();
        k.replenish_second();
        k.replenish_day();
        assert_eq!(k.remaining_second(), 4);
        assert_eq!(k.remaining_day(), 10);

        k.consume().unwrap();
        k.replenish_second();
        assert_eq!(k.remaining_second(), 4);
        assert_eq!(k.remaining_day(), 9);

        let snap = k.snapshot();
        assert_eq!(snap.masked_key, "abcd***");
        assert!(snap.has_capacity());

        k.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_overdraw() {
        // 每秒窗口 50 秒才补充一次，测试期间不会触发。
        let k = ApiKey::new(&config("abcdefgh", 1_000, 50), WindowPolicy::ScaledByLimit).unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let k = k.clone();
            handles.push(tokio::spawn(async move { k.consume().is_ok() }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }

        assert_eq!(ok, 50);
        assert_eq!(k.remaining_second(), 0);
        assert_eq!(k.remaining_day(), 950);

        k.shutdown();
    }

    #[test]
    fn new_requires_runtime() {
        let err = ApiKey::new(&config("abcdefgh", 1, 1), WindowPolicy::ScaledByLimit).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn new_requires_time_driver() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let err =
                ApiKey::new(&config("abcdefgh", 1, 1), WindowPolicy::ScaledByLimit).unwrap_err();
            assert!(err.is_config());
        });
    }

    #[test]
    fn new_rejects_invalid_limits() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(ApiKey::new(&config("abcdefgh", 0, 1), WindowPolicy::ScaledByLimit).is_err());
            assert!(ApiKey::new(&config("", 1, 1), WindowPolicy::ScaledByLimit).is_err());
        });
    }
}
