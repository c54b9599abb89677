use crate::error::AppError;
use crate::logging::mask_secret;
use serde::{Deserialize, Serialize};

/// 一条密钥配置：密钥本身与两个调用上限。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub key: String,
    pub call_per_day: u32,
    pub call_per_second: u32,
}

impl KeyConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.key.trim().is_empty() {
            return Err(AppError::config("API 密钥不能为空"));
        }
        if self.call_per_day == 0 {
            return Err(AppError::config(format!(
                "密钥 {} 的 call_per_day 必须大于 0",
                mask_secret(&self.key)
            )));
        }
        if self.call_per_second == 0 {
            return Err(AppError::config(format!(
                "密钥 {} 的 call_per_second 必须大于 0",
                mask_secret(&self.key)
            )));
        }
        Ok(())
    }
}
