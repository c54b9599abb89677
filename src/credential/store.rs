use crate::credential::types::KeyConfig;
use crate::error::AppError;
use anyhow::Context;
use std::path::Path;

/// 旧格式（每行一个 key）没有携带限额时使用的默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLimits {
    pub call_per_day: u32,
    pub call_per_second: u32,
}

impl DefaultLimits {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            call_per_day: cfg.default_call_per_day,
            call_per_second: cfg.default_call_per_second,
        }
    }
}

/// 从文件加载密钥列表。
///
/// - 以 `[` 开头：JSON 数组，每项为 `{"key", "call_per_day", "call_per_second"}`
/// - 其他：每行一个 key，空行与 `#` 注释忽略，限额取 `defaults`
///
/// 读取失败、格式错误、列表为空或任一条目无效都返回错误，调用方不应继续构建密钥池。
pub async fn load_keys(path: &Path, defaults: DefaultLimits) -> Result<Vec<KeyConfig>, AppError> {
    tracing::info!("从 `{}` 加载 API 密钥", path.display());

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("读取密钥文件 `{}` 失败", path.display()))?;

    let keys = parse_keys(&data, defaults)?;
    tracing::info!("共加载 {} 个 API 密钥", keys.len());
    Ok(keys)
}

pub fn parse_keys(data: &[u8], defaults: DefaultLimits) -> Result<Vec<KeyConfig>, AppError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| AppError::config(format!("密钥文件不是合法的 UTF-8: {e}")))?;
    let trimmed = text.trim_start_matches('\u{feff}').trim();

    let keys: Vec<KeyConfig> = if trimmed.starts_with('[') {
        // 错误信息里不回显原始内容，避免把密钥写进日志。
        sonic_rs::from_str(trimmed)
            .map_err(|e| AppError::config(format!("解析 JSON 密钥列表失败: {e}")))?
    } else {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|key| KeyConfig {
                key: key.to_string(),
                call_per_day: defaults.call_per_day,
                call_per_second: defaults.call_per_second,
            })
            .collect()
    };

    if keys.is_empty() {
        return Err(AppError::config("密钥文件中没有任何 API 密钥"));
    }
    for (i, k) in keys.iter().enumerate() {
        k.validate()
            .map_err(|e| AppError::config(format!("第 {} 个 API 密钥无效: {e}", i + 1)))?;
    }
    Ok(keys)
}
