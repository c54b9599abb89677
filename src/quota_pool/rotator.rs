use crate::credential::KeyConfig;
use crate::error::{AppError, QuotaError};
use crate::quota_pool::key::ApiKey;
use crate::quota_pool::types::{KeySnapshot, WindowPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 密钥轮询器：按加载顺序轮流挑选仍有配额的密钥。
///
/// 游标是一个原子变量，每探测一个位置就前进一格，并发调用不会读到同一个位置。
/// 轮询器本身不持有任何锁，调用密钥方法时也不会出现锁嵌套。
#[derive(Debug)]
pub struct KeyRotator {
    keys: Vec<Arc<ApiKey>>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    /// 根据配置构建密钥池。任一配置无效或列表为空都会失败，已创建的密钥随之释放。
    pub fn new(configs: &[KeyConfig], policy: WindowPolicy) -> Result<Self, AppError> {
        if configs.is_empty() {
            return Err(AppError::config("API 密钥列表为空"));
        }

        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(configs.len());
        for (i, cfg) in configs.iter().enumerate() {
            let key = ApiKey::new(cfg, policy)
                .map_err(|e| AppError::config(format!("第 {} 个 API 密钥无效: {e}", i + 1)))?;
            if !seen.insert(cfg.key.clone()) {
                tracing::warn!(key = %key.masked_key(), "API 密钥重复出现，配额将分别计算");
            }
            keys.push(key);
        }

        tracing::info!(count = keys.len(), ?policy, "API 密钥池已就绪");
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// 选择下一个仍有配额的密钥并消耗一次调用。
    ///
    /// - 整个池都没有配额：`PoolExhausted`，不会等待补充
    /// - 通过容量检查后被并发请求抢先耗尽：`RaceLoss`，不在内部重试
    pub fn select(&self) -> Result<String, QuotaError> {
        let len = self.keys.len();
        for _ in 0..len {
            let key = &self.keys[self.advance_cursor()];
            if !key.has_capacity() {
                continue;
            }

            return match key.consume() {
                Ok(k) => Ok(k.to_string()),
                Err(e) => {
                    tracing::debug!(error = %e, "容量检查后消耗失败");
                    Err(QuotaError::RaceLoss {
                        key: key.masked_key().to_string(),
                    })
                }
            };
        }

        Err(QuotaError::PoolExhausted { pool_size: len })
    }

    /// 返回当前游标并前进一格（越过末尾回到 0）。
    fn advance_cursor(&self) -> usize {
        let len = self.keys.len();
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Arc<ApiKey>] {
        &self.keys
    }

    /// 当前有配额的密钥数量。
    pub fn available(&self) -> usize {
        self.keys.iter().filter(|k| k.has_capacity()).count()
    }

    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        self.keys.iter().map(|k| k.snapshot()).collect()
    }

    pub fn shutdown(&self) {
        for key in &self.keys {
            key.shutdown();
        }
        tracing::info!(count = self.keys.len(), "API 密钥池已关闭");
    }
}
