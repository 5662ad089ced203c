//! Settlement file download with retries and a cheap signature check.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::TradingDate;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::{RetryPolicy, RetryableError};

/// Bytes inspected by the binary-content check.
const SIGNATURE_WINDOW: usize = 1024;

/// Why a settlement file could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("no settlement file published for {trading_date}")]
    NotFound { trading_date: TradingDate },

    #[error("request rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("response is not a settlement file: {reason}")]
    Malformed { reason: String },

    #[error("fetch deadline exceeded")]
    Timeout,

    #[error("trading date {trading_date} is in the future")]
    FutureDate { trading_date: TradingDate },
}

impl FetchError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "fetch_transient",
            Self::NotFound { .. } => "fetch_not_found",
            Self::Rejected { .. } => "fetch_rejected",
            Self::InvalidRequest { .. } => "fetch_invalid_request",
            Self::Malformed { .. } => "fetch_malformed",
            Self::Timeout => "fetch_timeout",
            Self::FutureDate { .. } => "fetch_future_date",
        }
    }
}

impl RetryableError for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn timed_out(operation: &str, after: Duration, deadline: bool) -> Self {
        if deadline {
            Self::Timeout
        } else {
            Self::Transient {
                attempts: 1,
                message: format!("{operation} timed out after {}ms", after.as_millis()),
            }
        }
    }

    fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Transient { message, .. } => Self::Transient { attempts, message },
            other => other,
        }
    }
}

/// Settlement file name for a trading date, e.g. `sp220823.dat`.
pub fn settlement_file_name(trading_date: TradingDate) -> String {
    format!("sp{}.dat", trading_date.file_token())
}

/// Reject bodies that clearly are not a settlement text file.
pub fn check_signature(body: &[u8]) -> Result<(), String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(String::from("empty body"));
    }
    let window = &body[..body.len().min(SIGNATURE_WINDOW)];
    if window.contains(&0) {
        return Err(String::from("binary content"));
    }
    let text = std::str::from_utf8(body).map_err(|_| String::from("not valid UTF-8 text"))?;
    let head = text
        .trim_start()
        .chars()
        .take(64)
        .collect::<String>()
        .to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Err(String::from("HTML document"));
    }
    Ok(())
}

/// Downloads settlement files addressed by trading date.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    base_url: String,
    retry: RetryPolicy,
    archive_dir: Option<PathBuf>,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
            archive_dir: None,
        }
    }

    /// Keep a copy of every successful download under `dir`.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn url_for(&self, trading_date: TradingDate) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            settlement_file_name(trading_date)
        )
    }

    /// Fetch the raw file for `trading_date`.
    ///
    /// Transient failures are retried; `NotFound`, `Rejected` and
    /// `Malformed` are returned immediately.
    pub async fn fetch(
        &self,
        trading_date: TradingDate,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, FetchError> {
        if trading_date.is_after_today() {
            return Err(FetchError::FutureDate { trading_date });
        }

        let url = self.url_for(trading_date);
        let body = self
            .retry
            .run("fetch", deadline, |attempt| {
                let request = HttpRequest::get(url.clone(), self.retry.attempt_timeout);
                async move {
                    debug!(%trading_date, attempt, url = %request.url, "downloading settlement file");
                    let response = self.client.download(request).await.map_err(|error| {
                        if error.retryable() {
                            FetchError::Transient {
                                attempts: attempt + 1,
                                message: error.to_string(),
                            }
                        } else {
                            FetchError::InvalidRequest {
                                message: error.to_string(),
                            }
                        }
                    })?;
                    self.classify(trading_date, attempt, response)
                }
            })
            .await?;

        check_signature(&body).map_err(|reason| FetchError::Malformed { reason })?;
        info!(%trading_date, bytes = body.len(), "settlement file downloaded");

        if let Some(dir) = &self.archive_dir {
            archive(dir, trading_date, &body).await;
        }
        Ok(body)
    }

    fn classify(
        &self,
        trading_date: TradingDate,
        attempt: u32,
        response: HttpResponse,
    ) -> Result<Vec<u8>, FetchError> {
        if response.is_success() {
            return Ok(response.body);
        }
        match response.status {
            404 => Err(FetchError::NotFound { trading_date }),
            status if self.retry.should_retry_status(status) => Err(FetchError::Transient {
                attempts: attempt + 1,
                message: format!("HTTP {status}"),
            }),
            status => Err(FetchError::Rejected { status }),
        }
    }
}

async fn archive(dir: &Path, trading_date: TradingDate, body: &[u8]) {
    let path = dir.join(settlement_file_name(trading_date));
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, body).await
    }
    .await;
    match written {
        Ok(()) => debug!(%trading_date, path = %path.display(), "archived settlement file"),
        Err(error) => {
            warn!(%trading_date, path = %path.display(), %error, "failed to archive settlement file");
        }
    }
}
