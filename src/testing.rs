//! Test doubles: a scripted backend, an in-memory sign-out flag and token minting

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Method;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::{AccessCredential, Session, SessionFlagStore, SessionSettings};

type Handler =
    Arc<dyn Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse, TransportError> + Send + Sync>;

struct Route {
    delay: Option<Duration>,
    handler: Handler,
}

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

/// Fake backend keyed by request path. Unrouted paths answer 404.
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.route(path, None, handler);
    }

    /// Like [`MockTransport::on`], answering after `delay` of (Tokio) time.
    pub fn on_delayed<F>(&self, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.route(path, Some(delay), handler);
    }

    fn route<F>(&self, path: &str, delay: Option<Duration>, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.routes.lock().insert(
            path.to_string(),
            Route {
                delay,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.path == path).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: ApiRequest,
        bearer: Option<String>,
    ) -> Result<ApiResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            bearer: bearer.clone(),
        });

        let route = self
            .routes
            .lock()
            .get(&request.path)
            .map(|r| (r.delay, r.handler.clone()));
        let Some((delay, handler)) = route else {
            return json_response(404, serde_json::json!({"message": "no route"}));
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        handler(&request, bearer.as_deref())
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse {
        status,
        body: body.to_string(),
    })
}

pub fn network_error() -> Result<ApiResponse, TransportError> {
    Err(TransportError::Connect("connection refused".into()))
}

/// Sign-out flag that lives only as long as the test.
pub struct MemoryFlag {
    signed_out: AtomicBool,
}

impl MemoryFlag {
    pub fn new(signed_out: bool) -> Self {
        Self {
            signed_out: AtomicBool::new(signed_out),
        }
    }
}

impl SessionFlagStore for MemoryFlag {
    fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }

    fn set_signed_out(&self, signed_out: bool) -> Result<()> {
        self.signed_out.store(signed_out, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_session(mock: Arc<MockTransport>) -> (Session, Arc<MemoryFlag>) {
    let flag = Arc::new(MemoryFlag::new(false));
    let session = Session::new(mock, flag.clone(), SessionSettings::default());
    (session, flag)
}

/// Session already holding a credential valid for 15 minutes.
pub fn signed_in_session(mock: Arc<MockTransport>) -> Session {
    let (session, _flag) = test_session(mock);
    session.install_credential(AccessCredential::new(future_token("u1", 15)));
    session
}

/// Unsigned JWT with the given subject and expiry. Every call yields a
/// distinct token.
pub fn mint_token(sub: &str, exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": sub,
        "exp": exp.timestamp(),
        "jti": uuid::Uuid::new_v4().to_string(),
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Token expiring `minutes` from now.
pub fn future_token(sub: &str, minutes: i64) -> String {
    mint_token(sub, Utc::now() + chrono::Duration::minutes(minutes))
}

pub fn user_json() -> serde_json::Value {
    serde_json::json!({
        "_id": "u1",
        "name": "Ada",
        "email": "ada@example.com",
        "emailVerified": true,
        "createdAt": "2024-05-01T10:00:00.000Z",
        "updatedAt": "2024-05-02T10:00:00.000Z"
    })
}
