use std::borrow::Cow;
use std::time::Duration;

/// 响应体日志的最大字节数（medium 级别下截断）。
const MAX_BODY_LOG_BYTES: usize = 2048;

/// 日志等级：
/// - off：不输出请求/响应细节
/// - low：只输出请求摘要（方法、脱敏后的 URL）与响应状态/耗时
/// - medium：在 low 的基础上输出响应体（截断）
/// - high：输出完整原始响应体
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "request" => Self::Low,
            "medium" | "body" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn request_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn body_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

/// 密钥脱敏：保留前 4 个字符，其余用 `***` 代替。
pub fn mask_secret(secret: &str) -> String {
    // 过短的密钥整体隐藏，避免前缀就是全部内容。
    if secret.chars().count() <= 4 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}***")
}

/// 把 URL 查询串中的 `api_key` 替换为脱敏值。
pub fn redact_url(url: &str) -> Cow<'_, str> {
    let Some((base, query)) = url.split_once('?') else {
        return Cow::Borrowed(url);
    };
    if !query.split('&').any(|p| p.starts_with("api_key=")) {
        return Cow::Borrowed(url);
    }

    let parts: Vec<String> = query
        .split('&')
        .map(|p| match p.strip_prefix("api_key=") {
            Some(v) => format!("api_key={}", mask_secret(v)),
            None => p.to_string(),
        })
        .collect();
    Cow::Owned(format!("{base}?{}", parts.join("&")))
}

pub fn backend_request(request_id: &str, method: &str, url: &str) {
    tracing::info!(request_id, "[后端请求] {method} {}", redact_url(url));
}

pub fn backend_response(request_id: &str, status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        request_id,
        "[后端响应] {} {}ms\n{}",
        status,
        format_duration_ms(duration),
        truncate_body(body, MAX_BODY_LOG_BYTES)
    );
}

pub fn backend_response_raw(request_id: &str, status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        request_id,
        "[后端响应（RAW）] {} {}ms\n{}",
        status,
        format_duration_ms(duration),
        String::from_utf8_lossy(body)
    );
}

pub fn backend_status(request_id: &str, status: u16, duration: Duration) {
    tracing::info!(
        request_id,
        "[后端响应] {} {}ms",
        status,
        format_duration_ms(duration)
    );
}

fn truncate_body(body: &[u8], max: usize) -> Cow<'_, str> {
    if body.len() <= max {
        return String::from_utf8_lossy(body);
    }
    let s = String::from_utf8_lossy(&body[..max]);
    Cow::Owned(format!("{s}...（共 {} 字节，已截断）", body.len()))
}
