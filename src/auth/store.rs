//! In-memory credential store with the proactive renewal timer

use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::credential::{proactive_delay, AccessCredential};

struct StoreState {
    credential: Option<AccessCredential>,
    /// Bumped on every mutation; a fired timer reports the generation it was
    /// armed for so stale ticks can be told apart.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    /// Generation produced by the last termination, if nothing happened since.
    terminated_at: Option<u64>,
}

impl StoreState {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Holds the single live access credential.
///
/// Every `set` cancels the armed timer and, for a credential with a known
/// expiry, arms a new one. When a timer fires it sends its generation on the
/// tick channel handed out by [`CredentialStore::new`].
pub struct CredentialStore {
    state: Mutex<StoreState>,
    skew: Duration,
    floor: Duration,
    ticks: mpsc::UnboundedSender<u64>,
}

impl CredentialStore {
    pub fn new(skew: Duration, floor: Duration) -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (ticks, rx) = mpsc::unbounded_channel();
        let store = Self {
            state: Mutex::new(StoreState {
                credential: None,
                generation: 0,
                timer: None,
                terminated_at: None,
            }),
            skew,
            floor,
            ticks,
        };
        (store, rx)
    }

    pub fn get(&self) -> Option<AccessCredential> {
        self.state.lock().credential.clone()
    }

    /// Replace the held credential. Returns the new generation.
    pub fn set(&self, credential: Option<AccessCredential>) -> u64 {
        let mut state = self.state.lock();
        state.disarm();
        state.generation += 1;
        let generation = state.generation;

        if let Some(ref cred) = credential {
            state.terminated_at = None;
            match cred.expires_at() {
                Some(expires_at) => {
                    let delay = proactive_delay(expires_at, Utc::now(), self.skew, self.floor);
                    state.timer = self.arm(generation, delay);
                }
                None => {
                    tracing::warn!("Access credential has no expiry claim; proactive renewal disabled")
                }
            }
        }

        state.credential = credential;
        generation
    }

    fn arm(&self, generation: u64, delay: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; proactive renewal not scheduled");
            return None;
        };
        tracing::debug!(
            generation,
            delay_secs = delay.as_secs(),
            "Proactive renewal scheduled"
        );
        let ticks = self.ticks.clone();
        Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = ticks.send(generation);
        }))
    }

    /// Whether `generation` still describes the held credential.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.credential.is_some()
    }

    /// Clear the credential as part of a session termination.
    ///
    /// Returns `false` when the session was already terminated and nothing has
    /// been stored since, so concurrent failures report one termination.
    pub fn terminate(&self) -> bool {
        let mut state = self.state.lock();
        if state.terminated_at == Some(state.generation) {
            return false;
        }
        state.disarm();
        state.generation += 1;
        state.credential = None;
        state.terminated_at = Some(state.generation);
        true
    }

    #[cfg(test)]
    pub fn has_timer(&self) -> bool {
        self.state.lock().timer.is_some()
    }
}

impl Drop for CredentialStore {
    fn drop(&mut self) {
        self.state.get_mut().disarm();
    }
}
