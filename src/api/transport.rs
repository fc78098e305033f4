//! reqwest-backed transport
//!
//! Wraps `reqwest::Client` with the API base URL, a request timeout and the
//! persistent cookie jar that carries the refresh cookie.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::cookies::CookieJar;
use super::{ApiRequest, ApiResponse, Transport, TransportError};

/// HTTP transport for the Eventify API.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, jar: Arc<CookieJar>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: ApiRequest,
        bearer: Option<String>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path);
        tracing::debug!("{} {}", request.method, url);

        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Some(ref body) => builder.json(body),
            None if request.method == reqwest::Method::POST => {
                builder.header(reqwest::header::CONTENT_LENGTH, "0")
            }
            None => builder,
        };

        let resp = builder.send().await.map_err(|e| {
            tracing::debug!("{} {} failed: {}", request.method, url, e);
            TransportError::from(e)
        })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(TransportError::from)?;
        tracing::debug!("{} {} -> {}", request.method, url, status);

        Ok(ApiResponse { status, body })
    }
}
