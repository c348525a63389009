//! Transport collaborator: the single place a request goes over the wire
//!
//! The protocol layer only produces and consumes [`HttpRequest`]/[`HttpResponse`]
//! values. Timeouts, cancellation and retry policy belong to the transport or its caller.

use crate::api::error::{Result, WebApiError};
use crate::api::operations::{Method, RequestHeaders};
use async_trait::async_trait;
use std::time::Duration;

/// Absolute request ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: RequestHeaders,
    pub body: Option<String>,
}

/// Raw response as handed back by the transport
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: RequestHeaders,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: RequestHeaders::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Non-2xx statuses are returned, not turned into errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| WebApiError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            log::trace!("Request body: {}", body);
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WebApiError::Transport(format!("{} {} failed: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let mut headers = RequestHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| WebApiError::Transport(format!("failed to read response body: {}", e)))?;
        log::trace!("HTTP {} response body: {}", status, body);

        Ok(HttpResponse { status, headers, body })
    }
}
