//! Thin REST wrapper: one method per endpoint, classified errors instead of
//! raw `reqwest` ones (§4.3).

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Http4xx,
    Http5xx,
    ExchangeError,
    Network,
    Unknown,
}

/// Metadata returned alongside every REST response: HTTP status, the
/// exchange's own retCode/retMsg, and rate-limit hints.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub http_status: u16,
    pub ret_code: Option<i64>,
    pub ret_msg: Option<String>,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RestResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub meta: ResponseMeta,
    pub message: String,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Issue a GET and return `{data, meta}`, or a [`ClassifiedError`] per
    /// the taxonomy in §4.3. `data` is the parsed `result` object when the
    /// exchange follows the `{retCode, retMsg, result}` envelope, otherwise
    /// the whole body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<RestResponse<Value>, ClassifiedError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ClassifiedError {
                category: if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::Unknown
                },
                meta: ResponseMeta::default(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body: Value = response.json().await.map_err(|e| ClassifiedError {
            category: ErrorCategory::Unknown,
            meta: ResponseMeta {
                http_status: status.as_u16(),
                retry_after,
                ..Default::default()
            },
            message: e.to_string(),
        })?;

        let ret_code = body.get("retCode").and_then(Value::as_i64);
        let ret_msg = body.get("retMsg").and_then(Value::as_str).map(String::from);
        let meta = ResponseMeta {
            http_status: status.as_u16(),
            ret_code,
            ret_msg: ret_msg.clone(),
            retry_after,
        };

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 || retry_after.is_some() {
            return Err(ClassifiedError {
                category: ErrorCategory::RateLimit,
                meta,
                message: ret_msg.unwrap_or_else(|| "rate limited".to_string()),
            });
        }
        if status.is_client_error() {
            return Err(ClassifiedError {
                category: ErrorCategory::Http4xx,
                meta,
                message: ret_msg.unwrap_or_else(|| status.to_string()),
            });
        }
        if status.is_server_error() {
            return Err(ClassifiedError {
                category: ErrorCategory::Http5xx,
                meta,
                message: ret_msg.unwrap_or_else(|| status.to_string()),
            });
        }
        if ret_code.map(|c| c != 0).unwrap_or(false) {
            return Err(ClassifiedError {
                category: ErrorCategory::ExchangeError,
                meta,
                message: ret_msg.unwrap_or_default(),
            });
        }

        let data = body.get("result").cloned().unwrap_or(body);
        Ok(RestResponse { data, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_error_display_includes_category() {
        let err = ClassifiedError {
            category: ErrorCategory::RateLimit,
            meta: ResponseMeta::default(),
            message: "too many requests".into(),
        };
        assert!(err.to_string().contains("RateLimit"));
    }
}
