//! Live dashboard stream
//!
//! Keeps a Socket.IO connection to the backend open while the session holds
//! an access credential, and folds pushed `dashboard_data` and `events`
//! messages into a [`DashboardState`] published on a watch channel.

pub mod dashboard;
mod frame;
mod socket;

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use url::Url;

use crate::auth::{Session, SessionEvent};
use crate::config::Config;
use crate::models::MetricsDashboard;

use dashboard::DashboardState;
use frame::{is_auth_error, Packet, CLOSE, CONNECT, PONG};
use socket::StreamSocket;

/// Silence tolerated before the server's handshake tells us better.
const DEFAULT_WATCHDOG: Duration = Duration::from_secs(45);
/// Pause before reconnecting once a refused token has been renewed.
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Capped exponential backoff for reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl From<&Config> for ReconnectPolicy {
    fn from(config: &Config) -> Self {
        Self {
            base_delay: config.stream_base_delay(),
            max_attempts: config.stream_max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), `None` past the ceiling.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1)?;
        self.base_delay.checked_mul(factor)
    }
}

/// Socket.IO endpoint for the API host: the base path is dropped and the
/// scheme switched to its WebSocket counterpart.
pub fn stream_url(api_base: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(api_base).context("Invalid API base URL")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("Unsupported API URL scheme '{}'", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot switch {} to {}", api_base, scheme))?;
    url.set_path("/socket.io/");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("token", token);
    Ok(url)
}

/// How one connection ended.
enum Outcome {
    Lost { connected: bool, error: String },
    /// The server refused the token.
    Rejected,
    /// Sign-out or termination.
    SessionEnded,
    /// The session is gone for good.
    Shutdown,
}

enum Pause {
    Elapsed,
    SessionEnded,
    Shutdown,
}

pub struct StreamClient {
    session: Session,
    api_base: String,
    policy: ReconnectPolicy,
    state: watch::Sender<DashboardState>,
}

impl StreamClient {
    pub fn new(session: Session, api_base: &str, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(DashboardState::default());
        Self {
            session,
            api_base: api_base.to_string(),
            policy,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut DashboardState)) {
        self.state.send_modify(f);
    }

    /// Drive the connection until the session is dropped. Cancel by dropping
    /// the future.
    pub async fn run(&self) {
        let mut events = self.session.subscribe();
        let mut attempt = 0u32;

        loop {
            let Some(token) = self.session.access_token() else {
                tracing::debug!("Stream idle until a credential is available");
                if !self.wait_for_credential(&mut events).await {
                    return;
                }
                continue;
            };

            match self.connect_once(&token, &mut events).await {
                Outcome::Shutdown => return,
                Outcome::SessionEnded => {
                    attempt = 0;
                    self.update(|s| s.set_disconnected(None));
                }
                Outcome::Rejected => {
                    attempt = 0;
                    self.update(|s| s.set_disconnected(Some("Authentication failed".into())));
                    if self.session.check_auth().await {
                        tracing::info!("Credential confirmed, reconnecting stream");
                        time::sleep(AUTH_RETRY_DELAY).await;
                    } else if !self.wait_for_credential(&mut events).await {
                        return;
                    }
                }
                Outcome::Lost { connected, error } => {
                    if connected {
                        attempt = 0;
                    }
                    attempt += 1;
                    let Some(delay) = self.policy.delay_for(attempt) else {
                        tracing::error!(
                            "Stream connection failed after {} attempts: {}",
                            self.policy.max_attempts,
                            error
                        );
                        self.update(|s| {
                            s.set_disconnected(Some(
                                "Connection failed after multiple attempts".into(),
                            ))
                        });
                        attempt = 0;
                        // Only a credential delivered from now on restarts the stream.
                        events = events.resubscribe();
                        if !self.wait_for_credential(&mut events).await {
                            return;
                        }
                        continue;
                    };

                    tracing::warn!(
                        "Stream disconnected: {}. Reconnecting in {}ms (attempt {})",
                        error,
                        delay.as_millis(),
                        attempt
                    );
                    self.update(|s| s.set_disconnected(Some(error)));
                    match self.pause(delay, &mut events).await {
                        Pause::Elapsed => {}
                        Pause::SessionEnded => {
                            attempt = 0;
                            self.update(|s| s.set_disconnected(None));
                        }
                        Pause::Shutdown => return,
                    }
                }
            }
        }
    }

    /// Wait for a session event that leaves a credential in the store.
    /// `false` when the session is gone.
    async fn wait_for_credential(&self, events: &mut broadcast::Receiver<SessionEvent>) -> bool {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Restored | SessionEvent::SignedIn | SessionEvent::Renewed)
                | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.session.access_token().is_some() {
                        return true;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }

    async fn pause(&self, delay: Duration, events: &mut broadcast::Receiver<SessionEvent>) -> Pause {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Pause::Elapsed,
                ev = events.recv() => match ev {
                    Ok(SessionEvent::SignedOut | SessionEvent::Terminated(_)) => {
                        return Pause::SessionEnded
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Pause::Shutdown,
                },
            }
        }
    }

    async fn connect_once(
        &self,
        token: &str,
        events: &mut broadcast::Receiver<SessionEvent>,
    ) -> Outcome {
        self.update(|s| s.set_connecting());

        let lost = |connected: bool, error: String| Outcome::Lost { connected, error };
        let url = match stream_url(&self.api_base, token) {
            Ok(url) => url,
            Err(e) => return lost(false, format!("{:#}", e)),
        };
        let mut socket = match StreamSocket::connect(&url).await {
            Ok(socket) => socket,
            Err(e) => return lost(false, format!("{:#}", e)),
        };

        let mut watchdog = DEFAULT_WATCHDOG;
        let mut deadline = Instant::now() + watchdog;
        let mut connected = false;

        let outcome = loop {
            tokio::select! {
                frame = socket.recv_text() => {
                    let text = match frame {
                        Ok(Some(text)) => text,
                        Ok(None) => break lost(connected, "closed by server".into()),
                        Err(e) => break lost(connected, format!("{:#}", e)),
                    };
                    deadline = Instant::now() + watchdog;

                    match Packet::decode(&text) {
                        Packet::Open(handshake) => {
                            watchdog = handshake.watchdog();
                            deadline = Instant::now() + watchdog;
                            if let Err(e) = socket.send_text(CONNECT).await {
                                break lost(connected, format!("{:#}", e));
                            }
                        }
                        Packet::Ping => {
                            if let Err(e) = socket.send_text(PONG).await {
                                break lost(connected, format!("{:#}", e));
                            }
                        }
                        Packet::Pong => {}
                        Packet::Connected => {
                            connected = true;
                            tracing::info!("Stream connected");
                            self.update(|s| s.set_connected());
                        }
                        Packet::Event { name, .. } if name == "unauthorized" => {
                            tracing::warn!("Stream rejected the access credential");
                            break Outcome::Rejected;
                        }
                        Packet::Event { name, data } => {
                            self.state.send_if_modified(|s| s.apply_event(&name, data));
                        }
                        Packet::ConnectError(message) if is_auth_error(&message) => {
                            tracing::warn!("Stream authentication failed: {}", message);
                            break Outcome::Rejected;
                        }
                        Packet::ConnectError(message) => break lost(connected, message),
                        Packet::Disconnect => {
                            break lost(connected, "Disconnected: io server disconnect".into())
                        }
                        Packet::Close => {
                            break lost(connected, "Disconnected: transport close".into())
                        }
                        Packet::Unknown(raw) => tracing::debug!("Ignoring stream frame: {}", raw),
                    }
                }
                _ = time::sleep_until(deadline) => {
                    break lost(connected, "heartbeat timeout".into());
                }
                ev = events.recv() => match ev {
                    Ok(SessionEvent::SignedOut | SessionEvent::Terminated(_)) => {
                        tracing::info!("Session ended, closing stream");
                        let _ = socket.send_text(CLOSE).await;
                        break Outcome::SessionEnded;
                    }
                    Err(broadcast::error::RecvError::Closed) => break Outcome::Shutdown,
                    _ => {}
                },
            }
        };

        socket.close().await;
        outcome
    }
}

/// Prints what changed between two view states.
#[derive(Default)]
struct Printer {
    connected: Option<bool>,
    error: Option<String>,
    dashboard: Option<MetricsDashboard>,
    newest_event: Option<String>,
}

impl Printer {
    fn render(&mut self, state: &DashboardState) {
        let conn = &state.connection;
        if self.connected != Some(conn.connected) || self.error != conn.error {
            match (conn.connected, conn.error.as_deref()) {
                (true, _) => println!("● connected"),
                (false, Some(err)) => println!("○ {}", err),
                (false, None) if conn.connecting => println!("… connecting"),
                (false, None) => println!("○ disconnected"),
            }
            self.connected = Some(conn.connected);
            self.error = conn.error.clone();
        }

        if state.dashboard.is_some() && state.dashboard != self.dashboard {
            if let Some(ref d) = state.dashboard {
                println!(
                    "Total events: {} ({:+.1}%) | Active users: {} ({:+.1}%) | Events/h: {:.0} | Conversion: {:.1}%",
                    d.total_events,
                    d.total_events_change,
                    d.active_users,
                    d.active_users_change,
                    d.events_per_hour,
                    d.conversion_rate
                );
            }
            self.dashboard = state.dashboard.clone();
        }

        let fresh: Vec<_> = state
            .live_events
            .iter()
            .take_while(|e| Some(&e.id) != self.newest_event.as_ref())
            .collect();
        for ev in fresh.iter().rev() {
            let place = [ev.country.as_deref(), ev.device.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "  {}  {}{}",
                ev.timestamp.format("%H:%M:%S"),
                ev.event_name,
                if place.is_empty() {
                    String::new()
                } else {
                    format!("  ({})", place)
                }
            );
        }
        if let Some(first) = state.live_events.first() {
            self.newest_event = Some(first.id.clone());
        }
    }
}

/// Stream the live dashboard to stdout until Ctrl-C or the session ends.
pub async fn watch(session: &Session, config: &Config) -> Result<()> {
    if !session.initialize().await && session.access_token().is_none() {
        bail!("Not logged in. Run 'eventify login' first.");
    }

    let client = StreamClient::new(
        session.clone(),
        &config.api_base_url,
        ReconnectPolicy::from(config),
    );
    let mut view = client.subscribe();
    let mut events = session.subscribe();
    let runner = client.run();
    tokio::pin!(runner);
    let mut printer = Printer::default();

    println!("Watching live events... (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = &mut runner => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = view.borrow_and_update().clone();
                printer.render(&state);
            }
            ev = events.recv() => match ev {
                Ok(SessionEvent::Terminated(reason)) => {
                    println!("Session ended ({}). Run 'eventify login' to sign in again.", reason);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }
    Ok(())
}
