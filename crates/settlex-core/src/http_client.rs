//! Download transport for settlement files.
//!
//! A URL and a timeout go in; a status and the raw bytes come out.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// Boxed future returned by [`HttpClient::download`].
pub type DownloadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

const ACCEPT: &str = "text/plain, text/csv, */*";

/// One GET for a settlement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

/// Status and body as received; the body is not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// A bodiless response with `status`.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("response body could not be read: {0}")]
    Body(String),

    /// The request itself is unusable; retrying cannot help.
    #[error("invalid request: {0}")]
    Request(String),
}

impl HttpError {
    pub const fn retryable(&self) -> bool {
        !matches!(self, Self::Request(_))
    }
}

/// Transport contract for downloading settlement files.
pub trait HttpClient: Send + Sync {
    fn download<'a>(&'a self, request: HttpRequest) -> DownloadFuture<'a>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("settlex/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout(error.to_string())
    } else if error.is_connect() {
        HttpError::Connect(error.to_string())
    } else if error.is_builder() {
        HttpError::Request(error.to_string())
    } else if error.is_body() || error.is_decode() {
        HttpError::Body(error.to_string())
    } else {
        HttpError::Connect(error.to_string())
    }
}

impl HttpClient for ReqwestHttpClient {
    fn download<'a>(&'a self, request: HttpRequest) -> DownloadFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .get(&request.url)
                .header(reqwest::header::ACCEPT, ACCEPT)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(transport_error)?;
            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}

type Script = VecDeque<Result<HttpResponse, HttpError>>;

#[derive(Debug, Default)]
struct Scripted {
    by_url: HashMap<String, Script>,
    seen: Vec<HttpRequest>,
    latency: Option<Duration>,
}

/// Scripted transport for offline tests.
///
/// Responses queued for a URL are served in order and the last one repeats.
/// Unknown URLs answer 404.
#[derive(Debug, Clone, Default)]
pub struct StaticHttpClient {
    scripted: Arc<Mutex<Scripted>>,
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response, or a transport error, for `url`.
    pub fn push(&self, url: impl Into<String>, response: Result<HttpResponse, HttpError>) {
        self.scripted()
            .by_url
            .entry(url.into())
            .or_default()
            .push_back(response);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.scripted().latency = Some(latency);
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.scripted().seen.clone()
    }

    pub fn request_count(&self) -> usize {
        self.scripted().seen.len()
    }

    fn scripted(&self) -> MutexGuard<'_, Scripted> {
        self.scripted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_for(
        &self,
        request: &HttpRequest,
    ) -> (Result<HttpResponse, HttpError>, Option<Duration>) {
        let mut scripted = self.scripted();
        scripted.seen.push(request.clone());
        let next = match scripted.by_url.get_mut(&request.url) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        let response = next.unwrap_or_else(|| Ok(HttpResponse::status(404)));
        (response, scripted.latency)
    }
}

impl HttpClient for StaticHttpClient {
    fn download<'a>(&'a self, request: HttpRequest) -> DownloadFuture<'a> {
        let (response, latency) = self.next_for(&request);
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            response
        })
    }
}
