//! HTTP Transport
//!
//! Transport port used for refresh and revoke requests, with a reqwest-backed
//! implementation and a mock for tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::TransportError;

/// HTTP request definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request with no headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a form-encoded body.
    pub fn form(mut self, params: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        self.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        self.body = Some(body);
        self
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// 200 response with a JSON body.
    pub fn json<T: serde::Serialize>(body: &T) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: serde_json::to_string(body).unwrap_or_default(),
        }
    }
}

/// HTTP transport interface (for dependency injection).
///
/// Implementations report non-success statuses as errors, classifying 401
/// and 403 so callers can tell a rejected credential from other failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(Duration::from_secs(30), 1048576) // 1MB
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Other {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { timeout }
            } else {
                TransportError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(TransportError::InvalidResponse {
                    message: format!("response too large: {} bytes", len),
                });
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::InvalidResponse {
                message: e.to_string(),
            })?;

        if body.len() > self.max_response_size {
            return Err(TransportError::InvalidResponse {
                message: format!("response too large: {} bytes", body.len()),
            });
        }

        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), body));
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            headers,
            body,
        })
    }
}

/// Mock HTTP transport for testing.
#[derive(Default)]
pub struct MockHttpTransport {
    results: std::sync::Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    request_history: std::sync::Mutex<Vec<HttpRequest>>,
    default_result: std::sync::Mutex<Option<Result<HttpResponse, TransportError>>>,
    latency: std::sync::Mutex<Option<Duration>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.results.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a 200 JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, body: &T) -> &Self {
        self.queue_response(HttpResponse::json(body))
    }

    /// Queue an error to return.
    pub fn queue_error(&self, error: TransportError) -> &Self {
        self.results.lock().unwrap().push_back(Err(error));
        self
    }

    /// Set default result when queue is empty.
    pub fn set_default_result(&self, result: Result<HttpResponse, TransportError>) -> &Self {
        *self.default_result.lock().unwrap() = Some(result);
        self
    }

    /// Delay every send by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().unwrap().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().unwrap().last().cloned()
    }

    /// Number of requests sent so far.
    pub fn request_count(&self) -> usize {
        self.request_history.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.request_history.lock().unwrap().push(request);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default_result.lock().unwrap().clone());

        result.unwrap_or_else(|| {
            Err(TransportError::ConnectionFailed {
                message: "No mock response available".to_string(),
            })
        })
    }
}

/// Create production HTTP transport.
pub fn create_transport(timeout: Option<Duration>) -> Result<ReqwestHttpTransport, TransportError> {
    match timeout {
        Some(t) => ReqwestHttpTransport::with_options(t, 1048576),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}
