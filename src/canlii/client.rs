use crate::canlii::types::{Case, CaseListResponse, Database, DatabaseListResponse};
use crate::config::Config;
use crate::error::QuotaError;
use crate::logging;
use crate::quota_pool::KeyRotator;
use crate::util::id;
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 错误信息里保留的最大响应体长度。
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("CanLII API 错误 {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_delay: Duration,
    },

    #[error("参数错误: {0}")]
    InvalidArgument(String),

    #[error("URL 无效: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_delay, .. } if *retry_delay != Duration::ZERO => Some(*retry_delay),
            _ => None,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }
}

/// CanLII 判例浏览接口客户端。每次请求（包括重试）都从密钥池重新取一个密钥。
#[derive(Debug, Clone)]
pub struct CanliiClient {
    http: reqwest::Client,
    base_url: String,
    language: String,
    rotator: Arc<KeyRotator>,
    retry_status_codes: Vec<u16>,
    retry_max_attempts: usize,
    log_level: logging::LogLevel,
}

impl CanliiClient {
    pub fn new(cfg: &Config, rotator: Arc<KeyRotator>) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(default_headers(&cfg.user_agent));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: cfg.api_url.clone(),
            language: cfg.language.clone(),
            rotator,
            retry_status_codes: cfg.retry_status_codes.clone(),
            retry_max_attempts: cfg.retry_max_attempts.max(1),
            log_level: cfg.log_level(),
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// 列出所有判例数据库。
    pub async fn database_list(&self) -> Result<Vec<Database>, ApiError> {
        let collection = format!("caseBrowse/{}/", self.language);
        let resp: DatabaseListResponse = self.get_json(&collection, &[]).await?;
        Ok(resp.databases)
    }

    /// 分页列出某个数据库中的判例。
    pub async fn case_list(
        &self,
        database_id: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Case>, ApiError> {
        let database_id = database_id.trim();
        if database_id.is_empty() {
            return Err(ApiError::InvalidArgument("databaseId 为空".to_string()));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let collection = format!(
            "caseBrowse/{}/{}/",
            self.language,
            urlencoding::encode(database_id)
        );
        let params = [
            ("offset", offset.to_string()),
            ("resultCount", count.to_string()),
        ];
        let resp: CaseListResponse = self.get_json(&collection, &params).await?;
        Ok(resp.cases)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        collection: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.with_retry(|| async {
            // 先解析地址，地址无效时不消耗配额。
            let url = endpoint_url(&self.base_url, collection)?;
            let api_key = self.rotator.select()?;
            let url = with_query(url, &api_key, params);
            let body = self.send(&url).await?;
            Ok::<T, ApiError>(sonic_rs::from_slice::<T>(&body)?)
        })
        .await
    }

    async fn send(&self, url: &Url) -> Result<Vec<u8>, ApiError> {
        let request_id = id::request_id();
        if self.log_level.request_enabled() {
            logging::backend_request(&request_id, "GET", url.as_str());
        }

        let start = Instant::now();
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let bytes = resp.bytes().await?;

        if self.log_level.raw_enabled() {
            logging::backend_response_raw(&request_id, status.as_u16(), start.elapsed(), &bytes);
        } else if self.log_level.body_enabled() {
            logging::backend_response(&request_id, status.as_u16(), start.elapsed(), &bytes);
        } else if self.log_level.request_enabled() {
            logging::backend_status(&request_id, status.as_u16(), start.elapsed());
        }

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), retry_after, &bytes));
        }
        Ok(bytes.to_vec())
    }

    async fn with_retry<F, Fut, T>(&self, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut last_err: Option<ApiError> = None;

        for attempt in 0..self.retry_max_attempts {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    // 配额/网络/JSON 错误：直接返回，是否等待由调用方决定。
                    let Some(status) = err.status() else {
                        return Err(err);
                    };

                    let should_retry = self.retry_status_codes.contains(&status);
                    if !should_retry || attempt + 1 == self.retry_max_attempts {
                        return Err(err);
                    }

                    let delay = err.retry_delay().unwrap_or_else(|| {
                        let ms = (1_000u64 * (attempt as u64 + 1)).min(5_000);
                        Duration::from_millis(ms)
                    });
                    tracing::warn!(
                        status,
                        attempt = attempt + 1,
                        delay_ms = logging::format_duration_ms(delay),
                        "CanLII 请求失败，稍后重试"
                    );
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_err.unwrap_or(ApiError::Http {
            status: 500,
            message: "未知错误".to_string(),
            retry_delay: Duration::ZERO,
        }))
    }
}

fn default_headers(user_agent: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).unwrap_or(HeaderValue::from_static("canlii-client")),
    );
    h.insert(ACCEPT, HeaderValue::from_static("application/json"));
    h
}

fn endpoint_url(base: &str, collection: &str) -> Result<Url, ApiError> {
    Ok(Url::parse(&format!("{base}{collection}"))?)
}

/// 追加查询参数：`?api_key=..&k=v..`。
fn with_query(mut url: Url, api_key: &str, params: &[(&str, String)]) -> Url {
    url.query_pairs_mut()
        .append_pair("api_key", api_key)
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    url
}

fn parse_retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

fn extract_error_details(status: u16, retry_delay: Duration, body: &[u8]) -> ApiError {
    #[derive(Debug, serde::Deserialize)]
    struct ErrResp {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    let message = sonic_rs::from_slice::<ErrResp>(body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                "Unknown error".to_string()
            } else {
                text.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
            }
        });

    ApiError::Http {
        status,
        message,
        retry_delay,
    }
}
