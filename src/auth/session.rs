//! Session lifecycle: restore, sign-in, sign-out and termination
//!
//! [`Session`] is the one component that owns client-side authentication
//! state. It is built once by `main` and cloned into every consumer (API
//! commands, the live stream). Renewal lives in `renewal.rs` and the
//! authenticated request path in `executor.rs`; both are `impl Session`
//! blocks over the shared state defined here.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use super::credential::AccessCredential;
use super::flag::SessionFlagStore;
use super::renewal::{RenewalCoordinator, RenewalTrigger};
use super::store::CredentialStore;
use crate::api::{ApiError, ApiRequest, ApiResponse, RenewalError, Transport};
use crate::config::Config;
use crate::models::{
    ResendOtpRequest, SignInRequest, SignInResponse, SignUpRequest, User, VerifyEmailRequest,
};

pub(crate) const SIGN_UP_PATH: &str = "/auth/sign-up";
pub(crate) const SIGN_IN_PATH: &str = "/auth/sign-in";
pub(crate) const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
pub(crate) const RESEND_OTP_PATH: &str = "/auth/otp/resend";
pub(crate) const REFRESH_PATH: &str = "/auth/refresh-token";
pub(crate) const SIGN_OUT_PATH: &str = "/auth/sign-out";
pub(crate) const PROFILE_PATH: &str = "/users";

/// Lifecycle of the client-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Initializing,
    Authenticated,
}

/// Why a session was terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// No credential could be renewed.
    RenewalFailed(String),
    /// The backend rejected a freshly renewed credential.
    CredentialRejected,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::RenewalFailed(reason) => write!(f, "renewal failed: {}", reason),
            TerminationReason::CredentialRejected => f.write_str("renewed credential rejected"),
        }
    }
}

/// Notifications for consumers that depend on the session.
///
/// `Terminated` and `SignedOut` both mean "go back to sign-in".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    /// A session was restored from the refresh cookie at startup.
    Restored,
    /// A new access credential replaced (or filled) the store.
    Renewed,
    SignedOut,
    Terminated(TerminationReason),
}

/// Timing knobs for credential handling.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub renewal_skew: Duration,
    pub renewal_floor: Duration,
    pub renewal_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            renewal_skew: Duration::from_secs(180),
            renewal_floor: Duration::from_secs(5),
            renewal_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            renewal_skew: config.renewal_skew(),
            renewal_floor: config.renewal_floor(),
            renewal_timeout: config.renewal_timeout(),
        }
    }
}

pub(super) struct Inner {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: CredentialStore,
    pub(super) renewal: RenewalCoordinator,
    pub(super) settings: SessionSettings,
    flag: Arc<dyn SessionFlagStore>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    profile: Mutex<Option<User>>,
    init: Mutex<Option<Shared<BoxFuture<'static, bool>>>>,
    /// Bumped by every sign-out so a renewal that started before it can be
    /// recognised and discarded.
    pub(super) sign_outs: AtomicU64,
}

/// Handle to the client session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    pub(super) inner: Arc<Inner>,
}

impl Session {
    /// Build a session. Must be called inside a Tokio runtime: the proactive
    /// renewal listener is spawned here.
    pub fn new(
        transport: Arc<dyn Transport>,
        flag: Arc<dyn SessionFlagStore>,
        settings: SessionSettings,
    ) -> Self {
        let (store, ticks) = CredentialStore::new(settings.renewal_skew, settings.renewal_floor);
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (events, _) = broadcast::channel(32);

        let inner = Arc::new(Inner {
            transport,
            store,
            renewal: RenewalCoordinator::new(),
            settings,
            flag,
            state,
            events,
            profile: Mutex::new(None),
            init: Mutex::new(None),
            sign_outs: AtomicU64::new(0),
        });

        spawn_proactive_listener(Arc::downgrade(&inner), ticks);
        Self { inner }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn credential(&self) -> Option<AccessCredential> {
        self.inner.store.get()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.store.get().map(|c| c.token().to_string())
    }

    /// Profile cached by the last sign-in, restore or [`Session::current_user`].
    pub fn profile(&self) -> Option<User> {
        self.inner.profile.lock().clone()
    }

    pub fn is_manually_signed_out(&self) -> bool {
        self.inner.flag.is_signed_out()
    }

    pub(super) fn set_state(&self, state: SessionState) {
        self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!("Session state {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Restore a session from the refresh cookie.
    ///
    /// Returns `false` without any network call when the user signed out
    /// explicitly. Concurrent callers share one in-flight initialization.
    pub async fn initialize(&self) -> bool {
        let fut = {
            let mut slot = self.inner.init.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let session = self.clone();
                    let fut = async move {
                        let restored = session.perform_initialization().await;
                        *session.inner.init.lock() = None;
                        restored
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    async fn perform_initialization(&self) -> bool {
        if self.inner.flag.is_signed_out() {
            tracing::debug!("Signed out explicitly; not restoring session");
            self.clear_local();
            return false;
        }

        self.set_state(SessionState::Initializing);
        if let Err(e) = self.renew(RenewalTrigger::Startup).await {
            tracing::debug!("No session restored: {}", e);
            self.set_state(SessionState::Unauthenticated);
            return false;
        }

        self.set_state(SessionState::Authenticated);
        // A valid credential with an unknown profile is still a session; the
        // profile is fetched again on next use.
        match self.fetch_profile().await {
            Ok(user) => {
                tracing::info!("Session restored for {}", user.email);
                *self.inner.profile.lock() = Some(user);
            }
            Err(e) => tracing::error!("Session restored but profile fetch failed: {}", e),
        }
        self.emit(SessionEvent::Restored);
        true
    }

    /// Send an unauthenticated request and fail on non-2xx.
    async fn send_public(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.inner.transport.execute(request, None).await?;
        response.error_for_status()
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<(), ApiError> {
        self.send_public(ApiRequest::post(SIGN_UP_PATH).json(request)?)
            .await
            .map(|_| ())
    }

    pub async fn verify_email(&self, request: &VerifyEmailRequest) -> Result<(), ApiError> {
        self.send_public(ApiRequest::post(VERIFY_EMAIL_PATH).json(request)?)
            .await
            .map(|_| ())
    }

    pub async fn resend_otp(&self, request: &ResendOtpRequest) -> Result<(), ApiError> {
        self.send_public(ApiRequest::post(RESEND_OTP_PATH).json(request)?)
            .await
            .map(|_| ())
    }

    /// Sign in with email and password. The backend sets the refresh cookie;
    /// the access credential from the body goes into the store.
    pub async fn sign_in(&self, request: &SignInRequest) -> Result<User, ApiError> {
        let response = self
            .send_public(ApiRequest::post(SIGN_IN_PATH).json(request)?)
            .await?;
        let body: SignInResponse = response.json()?;
        if body.access_token.is_empty() {
            return Err(ApiError::Decode("sign-in response has no accessToken".into()));
        }

        if let Err(e) = self.inner.flag.set_signed_out(false) {
            tracing::warn!("Failed to clear sign-out flag: {:#}", e);
        }
        self.inner
            .store
            .set(Some(AccessCredential::new(body.access_token)));
        self.set_state(SessionState::Authenticated);

        let user = match body.user {
            Some(user) => user,
            None => self.fetch_profile().await?,
        };
        *self.inner.profile.lock() = Some(user.clone());

        tracing::info!("Signed in as {}", user.email);
        self.emit(SessionEvent::SignedIn);
        Ok(user)
    }

    /// Sign out locally, then ask the backend to drop the refresh cookie.
    /// Local state is cleared whatever the backend says.
    pub async fn sign_out(&self) {
        self.inner.sign_outs.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.inner.flag.set_signed_out(true) {
            tracing::warn!("Failed to persist sign-out flag: {:#}", e);
        }
        self.clear_local();

        match self.send_public(ApiRequest::post(SIGN_OUT_PATH)).await {
            Ok(_) => tracing::debug!("Backend session invalidated"),
            Err(e) => tracing::warn!("Backend sign-out failed: {}", e),
        }

        tracing::info!("Signed out");
        self.emit(SessionEvent::SignedOut);
    }

    /// Fetch the current user's profile through the authenticated path and
    /// cache it.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let user = self.fetch_profile().await?;
        *self.inner.profile.lock() = Some(user.clone());
        Ok(user)
    }

    async fn fetch_profile(&self) -> Result<User, ApiError> {
        self.get_json(ApiRequest::get(PROFILE_PATH)).await
    }

    /// Make sure a usable credential exists and the backend accepts it.
    pub async fn check_auth(&self) -> bool {
        if self.inner.store.get().is_none() {
            if let Err(e) = self.renew(RenewalTrigger::Request).await {
                tracing::debug!("Auth check: renewal failed: {}", e);
                return false;
            }
        }
        match self.current_user().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Auth check failed: {}", e);
                false
            }
        }
    }

    /// Drop the credential and dependent state without announcing anything.
    pub(super) fn clear_local(&self) {
        self.inner.store.set(None);
        *self.inner.profile.lock() = None;
        self.set_state(SessionState::Unauthenticated);
    }

    /// Terminate the session: clear everything and tell consumers to return to
    /// sign-in. Repeated terminations for the same lost credential announce once.
    pub(crate) fn terminate(&self, reason: TerminationReason) {
        let first = self.inner.store.terminate();
        *self.inner.profile.lock() = None;
        self.set_state(SessionState::Unauthenticated);

        if first {
            tracing::warn!("Session terminated: {}", reason);
            self.emit(SessionEvent::Terminated(reason));
        }
    }

    #[cfg(test)]
    pub(crate) fn install_credential(&self, credential: AccessCredential) {
        self.inner.store.set(Some(credential));
    }

    pub(super) fn renewal_failure_reason(error: &RenewalError) -> TerminationReason {
        TerminationReason::RenewalFailed(error.to_string())
    }
}

/// Turn timer ticks into proactive renewals. Ticks for a credential that has
/// since been replaced or cleared are dropped.
fn spawn_proactive_listener(inner: Weak<Inner>, mut ticks: mpsc::UnboundedReceiver<u64>) {
    tokio::spawn(async move {
        while let Some(generation) = ticks.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.store.is_current(generation) {
                tracing::debug!(generation, "Ignoring stale renewal timer");
                continue;
            }

            let session = Session { inner };
            tracing::info!("Access credential nearing expiry, renewing");
            // Failures are logged by the renewal itself.
            tokio::spawn(async move {
                let _ = session.renew(RenewalTrigger::Proactive).await;
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        future_token, json_response, test_session, user_json, MemoryFlag, MockTransport,
    };
    use tokio_test::{assert_err, assert_ok};

    fn with_refresh(mock: &MockTransport, token: String) {
        mock.on(REFRESH_PATH, move |_, _| {
            json_response(200, serde_json::json!({ "accessToken": token }))
        });
    }

    fn with_profile(mock: &MockTransport) {
        mock.on(PROFILE_PATH, |_, bearer| match bearer {
            Some(_) => json_response(200, user_json()),
            None => json_response(401, serde_json::json!({})),
        });
    }

    #[tokio::test]
    async fn test_initialize_restores_session_and_profile() {
        let mock = MockTransport::new();
        with_refresh(&mock, future_token("fresh", 15));
        with_profile(&mock);
        let (session, _flag) = test_session(mock.clone());
        let mut events = session.subscribe();

        assert!(session.initialize().await);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.profile().unwrap().email, "ada@example.com");
        assert!(session.access_token().is_some());
        assert_eq!(mock.count(REFRESH_PATH), 1);

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
        assert!(seen.contains(&SessionEvent::Renewed));
        assert!(seen.contains(&SessionEvent::Restored));
    }

    #[tokio::test]
    async fn test_initialize_without_session_is_silent() {
        for status in [400, 401] {
            let mock = MockTransport::new();
            mock.on(REFRESH_PATH, move |_, _| {
                json_response(status, serde_json::json!({"message": "No refresh token"}))
            });
            let (session, _flag) = test_session(mock.clone());
            let mut events = session.subscribe();

            assert!(!session.initialize().await);
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert!(session.access_token().is_none());
            // Visitors without a session are not redirected anywhere.
            assert!(events.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_initialize_unexpected_failure_terminates() {
        let mock = MockTransport::new();
        mock.on(REFRESH_PATH, |_, _| json_response(500, serde_json::json!({})));
        let (session, _flag) = test_session(mock.clone());
        let mut events = session.subscribe();

        assert!(!session.initialize().await);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::Terminated(TerminationReason::RenewalFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_initialize_profile_failure_keeps_session() {
        let mock = MockTransport::new();
        with_refresh(&mock, future_token("fresh", 15));
        mock.on(PROFILE_PATH, |_, _| json_response(500, serde_json::json!({})));
        let (session, _flag) = test_session(mock.clone());

        assert!(session.initialize().await);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.profile().is_none());
        assert!(session.access_token().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_initialize_shares_one_renewal() {
        let mock = MockTransport::new();
        let token = future_token("fresh", 15);
        mock.on_delayed(REFRESH_PATH, Duration::from_millis(50), move |_, _| {
            json_response(200, serde_json::json!({ "accessToken": token }))
        });
        with_profile(&mock);
        let (session, _flag) = test_session(mock.clone());

        let (a, b, c) = tokio::join!(
            session.initialize(),
            session.initialize(),
            session.initialize()
        );
        assert!(a && b && c);
        assert_eq!(mock.count(REFRESH_PATH), 1);
        assert_eq!(mock.count(PROFILE_PATH), 1);
    }

    #[tokio::test]
    async fn test_sign_in_stores_credential_and_clears_flag() {
        let mock = MockTransport::new();
        let token = future_token("signin", 15);
        let expected = token.clone();
        mock.on(SIGN_IN_PATH, move |req, bearer| {
            assert!(bearer.is_none());
            let body = req.body.as_ref().unwrap();
            assert_eq!(body["email"], "ada@example.com");
            json_response(
                200,
                serde_json::json!({
                    "accessToken": token,
                    "refreshToken": "ignored",
                    "user": user_json()
                }),
            )
        });
        let flag = Arc::new(MemoryFlag::new(true));
        let session = Session::new(mock.clone(), flag.clone(), SessionSettings::default());
        let mut events = session.subscribe();

        let user = assert_ok!(
            session
                .sign_in(&SignInRequest {
                    email: "ada@example.com".into(),
                    password: "hunter2".into(),
                })
                .await
        );
        assert_eq!(user.name, "Ada");
        assert!(!flag.is_signed_out());
        assert_eq!(session.access_token(), Some(expected));
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
        // The profile came with the response.
        assert_eq!(mock.count(PROFILE_PATH), 0);
    }

    #[tokio::test]
    async fn test_sign_in_rejected_keeps_flag() {
        let mock = MockTransport::new();
        mock.on(SIGN_IN_PATH, |_, _| {
            json_response(401, serde_json::json!({"message": "Invalid credentials"}))
        });
        let flag = Arc::new(MemoryFlag::new(true));
        let session = Session::new(mock.clone(), flag.clone(), SessionSettings::default());

        let err = assert_err!(
            session
                .sign_in(&SignInRequest {
                    email: "ada@example.com".into(),
                    password: "wrong".into(),
                })
                .await
        );
        assert_eq!(err.status(), Some(401));
        assert!(flag.is_signed_out());
        assert!(session.access_token().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_then_initialize_makes_no_network_call() {
        let mock = MockTransport::new();
        with_refresh(&mock, future_token("fresh", 15));
        with_profile(&mock);
        mock.on(SIGN_OUT_PATH, |_, _| json_response(500, serde_json::json!({})));
        let (session, flag) = test_session(mock.clone());
        assert!(session.initialize().await);
        let mut events = session.subscribe();

        session.sign_out().await;
        assert!(flag.is_signed_out());
        assert!(session.access_token().is_none());
        assert!(session.profile().is_none());
        assert_eq!(session.state(), SessionState::Unauthenticated);
        // Backend failure does not stop the local sign-out.
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);

        let calls_before = mock.calls().len();
        assert!(!session.initialize().await);

        // Same flag store, new process.
        let reloaded = Session::new(mock.clone(), flag.clone(), SessionSettings::default());
        assert!(!reloaded.initialize().await);
        assert_eq!(mock.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_renewal_finishing_after_sign_out_is_discarded() {
        let mock = MockTransport::new();
        let token = future_token("late", 15);
        mock.on_delayed(REFRESH_PATH, Duration::from_millis(100), move |_, _| {
            json_response(200, serde_json::json!({ "accessToken": token }))
        });
        mock.on(SIGN_OUT_PATH, |_, _| json_response(200, serde_json::json!({})));
        let (session, _flag) = test_session(mock.clone());

        let renewing = {
            let session = session.clone();
            tokio::spawn(async move { session.renew(RenewalTrigger::Request).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.sign_out().await;

        assert!(renewing.await.unwrap().is_err());
        assert!(session.access_token().is_none());
    }

    #[tokio::test]
    async fn test_public_auth_calls_send_no_bearer() {
        let mock = MockTransport::new();
        for path in [SIGN_UP_PATH, VERIFY_EMAIL_PATH, RESEND_OTP_PATH] {
            mock.on(path, |_, bearer| {
                assert!(bearer.is_none());
                json_response(201, serde_json::json!({}))
            });
        }
        let (session, _flag) = test_session(mock.clone());

        assert_ok!(
            session
                .sign_up(&SignUpRequest {
                    name: "Ada".into(),
                    email: "ada@example.com".into(),
                    password: "hunter2".into(),
                })
                .await
        );
        assert_ok!(
            session
                .verify_email(&VerifyEmailRequest {
                    email: "ada@example.com".into(),
                    otp: "123456".into(),
                })
                .await
        );
        assert_ok!(
            session
                .resend_otp(&ResendOtpRequest {
                    email: "ada@example.com".into(),
                })
                .await
        );
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_check_auth() {
        let mock = MockTransport::new();
        with_refresh(&mock, future_token("fresh", 15));
        with_profile(&mock);
        let (session, _flag) = test_session(mock.clone());

        assert!(session.check_auth().await);
        assert_eq!(session.profile().unwrap().id, "u1");

        let mock = MockTransport::new();
        mock.on(REFRESH_PATH, |_, _| json_response(401, serde_json::json!({})));
        let (session, _flag) = test_session(mock.clone());
        assert!(!session.check_auth().await);
    }
}
