//! Single-flight credential renewal
//!
//! At most one refresh call is in flight at any time. Callers arriving while
//! one is running queue behind it and receive the same outcome.

use std::mem;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::credential::AccessCredential;
use super::session::{Session, SessionEvent, SessionState, REFRESH_PATH};
use crate::api::{ApiRequest, RenewalError};
use crate::models::RefreshResponse;

type RenewalResult = Result<AccessCredential, RenewalError>;
type Waiter = oneshot::Sender<RenewalResult>;

/// What started a renewal. Decides how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalTrigger {
    /// Probing for an existing session during `initialize()`.
    Startup,
    /// An authenticated call needed a credential.
    Request,
    /// The expiry timer fired.
    Proactive,
}

enum RenewalState {
    Idle,
    InFlight(Vec<Waiter>),
}

pub(super) struct RenewalCoordinator {
    state: Mutex<RenewalState>,
}

impl RenewalCoordinator {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(RenewalState::Idle),
        }
    }

    /// Register a waiter. Returns `true` as second element when the caller
    /// is the one that has to start the renewal.
    fn join(&self) -> (oneshot::Receiver<RenewalResult>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        match *state {
            RenewalState::InFlight(ref mut waiters) => {
                waiters.push(tx);
                (rx, false)
            }
            RenewalState::Idle => {
                *state = RenewalState::InFlight(vec![tx]);
                (rx, true)
            }
        }
    }

    /// Resolve every waiter with `result` and go back to idle.
    fn finish(&self, result: RenewalResult) {
        let waiters = match mem::replace(&mut *self.state.lock(), RenewalState::Idle) {
            RenewalState::InFlight(waiters) => waiters,
            RenewalState::Idle => Vec::new(),
        };
        tracing::debug!(waiters = waiters.len(), ok = result.is_ok(), "Renewal settled");
        for waiter in waiters {
            // A waiter whose caller went away is fine to skip.
            let _ = waiter.send(result.clone());
        }
    }

    #[cfg(test)]
    fn is_in_flight(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::InFlight(_))
    }
}

impl Session {
    /// Obtain a fresh access credential, sharing any renewal already running.
    pub(crate) async fn renew(&self, trigger: RenewalTrigger) -> RenewalResult {
        let (rx, leader) = self.inner.renewal.join();
        if leader {
            // Run detached so a caller that gives up cannot strand the others.
            let session = self.clone();
            tokio::spawn(async move { session.run_renewal(trigger).await });
        } else {
            tracing::debug!(?trigger, "Joining in-flight renewal");
        }

        rx.await
            .unwrap_or_else(|_| Err(RenewalError::Unexpected("renewal task aborted".into())))
    }

    async fn run_renewal(&self, trigger: RenewalTrigger) {
        tracing::debug!(?trigger, "Renewing access credential");
        let epoch = self.inner.sign_outs.load(Ordering::SeqCst);
        let outcome = self.request_renewal().await;
        let signed_out = self.inner.sign_outs.load(Ordering::SeqCst) != epoch;

        let result = match outcome {
            Ok(_) if signed_out => {
                tracing::debug!("Discarding credential renewed across a sign-out");
                Err(RenewalError::NoSession)
            }
            Ok(credential) => {
                self.inner.store.set(Some(credential.clone()));
                if self.state() == SessionState::Unauthenticated {
                    self.set_state(SessionState::Authenticated);
                }
                tracing::info!("Access credential renewed");
                self.emit(SessionEvent::Renewed);
                Ok(credential)
            }
            Err(e) => {
                if !signed_out {
                    self.on_renewal_failure(trigger, &e);
                }
                Err(e)
            }
        };

        self.inner.renewal.finish(result);
    }

    /// The refresh call itself. The durable credential rides along as a cookie.
    async fn request_renewal(&self) -> RenewalResult {
        let timeout = self.inner.settings.renewal_timeout;
        let call = self
            .inner
            .transport
            .execute(ApiRequest::post(REFRESH_PATH), None);

        let response = match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                return Err(RenewalError::Unexpected(format!(
                    "refresh timed out after {}s",
                    timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(RenewalError::Unexpected(e.to_string())),
            Ok(Ok(response)) => response,
        };

        match response.status {
            400 | 401 => return Err(RenewalError::NoSession),
            status if !(200..300).contains(&status) => {
                return Err(RenewalError::Unexpected(response.into_error().to_string()))
            }
            _ => {}
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RenewalError::Unexpected(e.to_string()))?;
        if body.access_token.is_empty() {
            return Err(RenewalError::Unexpected(
                "refresh response has no accessToken".into(),
            ));
        }
        Ok(AccessCredential::new(body.access_token))
    }

    fn on_renewal_failure(&self, trigger: RenewalTrigger, error: &RenewalError) {
        match (trigger, error) {
            (RenewalTrigger::Startup, RenewalError::NoSession) => {
                tracing::debug!("No session to restore");
                self.clear_local();
            }
            (RenewalTrigger::Proactive, _) => {
                // The held credential may still be good until a call says otherwise.
                tracing::warn!("Proactive renewal failed: {}", error);
            }
            (_, RenewalError::NoSession) => {
                tracing::info!("Session expired");
                self.terminate(Session::renewal_failure_reason(error));
            }
            (_, RenewalError::Unexpected(reason)) => {
                tracing::error!("Session renewal failed: {}", reason);
                self.terminate(Session::renewal_failure_reason(error));
            }
        }
    }
}
