//! Backend API access for Eventify
//!
//! Requests are described by [`ApiRequest`] and sent through a [`Transport`].
//! Authenticated calls go through [`crate::auth::Session::call`], which owns
//! bearer attachment and credential renewal; the feature modules here only
//! build requests and decode responses.

pub mod cookies;
pub mod error;
mod events;
mod keys;
pub mod retry;
pub mod transport;
mod users;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::{ApiError, RenewalError, TransportError};
pub use events::{delete_events, list_events};
pub use keys::{create_key, delete_key, list_keys, set_key_active, validate_key};
pub use users::{delete_account, update_profile, whoami};

/// A backend call relative to the configured API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }
}

/// Raw backend answer: status and body text.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body. An empty body decodes as JSON `null` first, then `{}`,
    /// so unit-like and all-default response types accept bodiless 2xx answers.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.trim().is_empty() {
            return serde_json::from_str("null")
                .or_else(|_| serde_json::from_str("{}"))
                .map_err(|e| ApiError::Decode(e.to_string()));
        }
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Convert a non-2xx answer into [`ApiError::Http`], using the backend's
    /// `message`/`error` field when present.
    pub fn into_error(self) -> ApiError {
        let message = serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| {
                reqwest::StatusCode::from_u16(self.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("request failed")
                    .to_string()
            });
        ApiError::Http {
            status: self.status,
            message,
        }
    }

    /// Succeed with the response, or fail with its error.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }
}

/// Network seam between the session logic and the backend.
///
/// Implementations send cookies for the API origin automatically; callers
/// only decide whether a bearer credential is attached.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: ApiRequest,
        bearer: Option<String>,
    ) -> Result<ApiResponse, TransportError>;
}

/// Percent-encode a single path segment.
pub(crate) fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
