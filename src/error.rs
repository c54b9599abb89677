use std::fmt;
use thiserror::Error;

/// 配额窗口：每秒 / 每日两个维度独立计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaWindow {
    Second,
    Day,
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Second => f.write_str("每秒"),
            Self::Day => f.write_str("每日"),
        }
    }
}

/// 配额相关的失败：均为可恢复错误，由调用方决定重试/排队/放弃。
///
/// 错误里携带的 key 一律是脱敏后的形式。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("密钥 {key} 的{window}配额已用尽")]
    QuotaExhausted { key: String, window: QuotaWindow },

    #[error("所有密钥的配额均已用尽（共 {pool_size} 个）")]
    PoolExhausted { pool_size: usize },

    #[error("密钥 {key} 通过容量检查后被并发请求抢先耗尽")]
    RaceLoss { key: String },
}

impl QuotaError {
    pub fn window(&self) -> Option<QuotaWindow> {
        match self {
            Self::QuotaExhausted { window, .. } => Some(*window),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
