use crate::quota_pool::WindowPolicy;
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_API_URL: &str = "http://api.canlii.org/v1/";
const DEFAULT_API_KEYS_FILE: &str = "apiKey";
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_USER_AGENT: &str = "canlii-client/0.1";
const DEFAULT_RETRY_STATUS_CODES: [u16; 4] = [429, 500, 502, 503];
const DEFAULT_CALL_PER_DAY: u32 = 5_000;
const DEFAULT_CALL_PER_SECOND: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_keys_file: String,
    pub language: String,

    pub user_agent: String,
    pub timeout_ms: u64,
    pub proxy: String,

    pub retry_status_codes: Vec<u16>,
    pub retry_max_attempts: usize,

    pub debug: String,

    pub window_policy: WindowPolicy,
    /// 旧格式密钥文件（每行一个 key）使用的默认限额。
    pub default_call_per_day: u32,
    pub default_call_per_second: u32,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "API_URL")]
    api_url: Option<String>,
    #[serde(alias = "API_KEYS_FILE")]
    api_keys_file: Option<String>,
    #[serde(alias = "LANGUAGE")]
    language: Option<String>,

    #[serde(alias = "API_USER_AGENT")]
    api_user_agent: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "RETRY_STATUS_CODES")]
    retry_status_codes: Option<String>,
    #[serde(alias = "RETRY_MAX_ATTEMPTS")]
    retry_max_attempts: Option<usize>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,

    #[serde(alias = "QUOTA_WINDOW_MODE")]
    quota_window_mode: Option<String>,
    #[serde(alias = "DEFAULT_CALL_PER_DAY")]
    default_call_per_day: Option<u32>,
    #[serde(alias = "DEFAULT_CALL_PER_SECOND")]
    default_call_per_second: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();
        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            api_url: normalize_api_url(raw.api_url.as_deref()),
            api_keys_file: raw
                .api_keys_file
                .unwrap_or_else(|| DEFAULT_API_KEYS_FILE.to_string()),
            language: raw
                .language
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            user_agent: raw
                .api_user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            retry_status_codes: parse_status_codes(raw.retry_status_codes.as_deref())
                .unwrap_or_else(|| DEFAULT_RETRY_STATUS_CODES.to_vec()),
            retry_max_attempts: raw.retry_max_attempts.unwrap_or(3),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            window_policy: WindowPolicy::parse(raw.quota_window_mode.as_deref().unwrap_or("")),
            default_call_per_day: raw
                .default_call_per_day
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CALL_PER_DAY),
            default_call_per_second: raw
                .default_call_per_second
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CALL_PER_SECOND),
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

/// 保证 base URL 以 `/` 结尾，方便直接拼接集合路径。
fn normalize_api_url(value: Option<&str>) -> String {
    let v = value.map(str::trim).unwrap_or("");
    let v = if v.is_empty() { DEFAULT_API_URL } else { v };
    if v.ends_with('/') {
        v.to_string()
    } else {
        format!("{v}/")
    }
}

fn parse_status_codes(value: Option<&str>) -> Option<Vec<u16>> {
    let out: Vec<u16> = value?
        .split(',')
        .filter_map(|p| p.trim().parse::<u16>().ok())
        .collect();
    if out.is_empty() { None } else { Some(out) }
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };
    let Ok(content) = std::fs::read_to_string(&dotenv_path) else {
        return;
    };

    for (key, value) in content.lines().filter_map(parse_dotenv_line) {
        // 已经显式设置的环境变量优先于 .env。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：set_var 为 unsafe。这里只在启动阶段、尚未并发读取环境变量时调用。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 不越过仓库根目录。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        dir = dir.parent()?;
    }
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2
            && let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote))
        {
            return Some((key.to_string(), inner.to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    for (i, _) in value.match_indices('#') {
        let prev = value[..i].chars().next_back();
        if matches!(prev, None | Some(' ') | Some('\t')) {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.api_keys_file, "apiKey");
        assert_eq!(cfg.language, "en");
        assert_eq!(cfg.retry_status_codes, vec![429, 500, 502, 503]);
        assert_eq!(cfg.retry_max_attempts, 3);
        assert_eq!(cfg.window_policy, WindowPolicy::ScaledByLimit);
        assert_eq!(cfg.default_call_per_second, 2);
    }

    #[test]
    fn test_from_raw_overrides() {
        let cfg = Config::from_raw(RawEnv {
            api_url: Some(" http://localhost:9000/v1 ".to_string()),
            language: Some("FR".to_string()),
            quota_window_mode: Some("fixed".to_string()),
            default_call_per_day: Some(0),
            default_call_per_second: Some(7),
            ..RawEnv::default()
        });
        assert_eq!(cfg.api_url, "http://localhost:9000/v1/");
        assert_eq!(cfg.language, "fr");
        assert_eq!(cfg.window_policy, WindowPolicy::Fixed);
        assert_eq!(cfg.default_call_per_day, DEFAULT_CALL_PER_DAY);
        assert_eq!(cfg.default_call_per_second, 7);
    }

    #[test]
    fn test_parse_status_codes() {
        assert_eq!(parse_status_codes(Some("429, 500,x,")), Some(vec![429, 500]));
        assert_eq!(parse_status_codes(Some(" , ")), None);
        assert_eq!(parse_status_codes(None), None);
    }

    #[test]
    fn test_parse_dotenv_line() {
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("=value"), None);
        assert_eq!(
            parse_dotenv_line("export DEBUG=low"),
            Some(("DEBUG".to_string(), "low".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("API_URL=\"http://x/#y\""),
            Some(("API_URL".to_string(), "http://x/#y".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("TIMEOUT=5000 # ms"),
            Some(("TIMEOUT".to_string(), "5000".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("PROXY=http://h/#frag"),
            Some(("PROXY".to_string(), "http://h/#frag".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("EMPTY="),
            Some(("EMPTY".to_string(), String::new()))
        );
    }
}
