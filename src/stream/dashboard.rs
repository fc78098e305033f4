//! View state fed by the stream

use chrono::{DateTime, Utc};

use crate::models::{LiveEvent, MetricsDashboard};

/// Live feed length; older entries fall off the end.
pub const LIVE_EVENTS_CAP: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Everything a dashboard view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub connection: ConnectionState,
    pub dashboard: Option<MetricsDashboard>,
    /// Newest first.
    pub live_events: Vec<LiveEvent>,
}

impl DashboardState {
    pub fn set_connecting(&mut self) {
        self.connection.connecting = true;
        self.connection.error = None;
    }

    pub fn set_connected(&mut self) {
        self.connection.connected = true;
        self.connection.connecting = false;
        self.connection.error = None;
        self.connection.last_update = Some(Utc::now());
    }

    pub fn set_disconnected(&mut self, error: Option<String>) {
        self.connection.connected = false;
        self.connection.connecting = false;
        self.connection.error = error;
    }

    /// Merge a server event. Returns whether anything changed.
    pub fn apply_event(&mut self, name: &str, data: serde_json::Value) -> bool {
        match name {
            "dashboard_data" => match serde_json::from_value::<MetricsDashboard>(data) {
                Ok(dashboard) => {
                    self.dashboard = Some(dashboard);
                    self.connection.last_update = Some(Utc::now());
                    true
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed dashboard_data: {}", e);
                    false
                }
            },
            "events" => match data {
                serde_json::Value::Array(items) => self.prepend_events(items),
                // Per-name counts; the snapshot carries those already.
                _ => false,
            },
            other => {
                tracing::debug!("Unhandled stream event '{}'", other);
                false
            }
        }
    }

    fn prepend_events(&mut self, items: Vec<serde_json::Value>) -> bool {
        let mut fresh: Vec<LiveEvent> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    tracing::debug!("Skipping malformed live event: {}", e);
                    None
                }
            })
            .collect();
        if fresh.is_empty() {
            return false;
        }

        fresh.append(&mut self.live_events);
        fresh.truncate(LIVE_EVENTS_CAP);
        self.live_events = fresh;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> serde_json::Value {
        serde_json::json!({
            "eventName": name,
            "timestamp": "2025-03-01T12:00:00Z",
            "country": "DK"
        })
    }

    #[test]
    fn test_dashboard_data_replaces_snapshot() {
        let mut state = DashboardState::default();
        assert!(state.apply_event("dashboard_data", serde_json::json!({"totalEvents": 1})));
        assert!(state.apply_event("dashboard_data", serde_json::json!({"activeUsers": 9})));

        let dash = state.dashboard.as_ref().unwrap();
        assert_eq!(dash.total_events, 0);
        assert_eq!(dash.active_users, 9);
        assert!(state.connection.last_update.is_some());
    }

    #[test]
    fn test_malformed_dashboard_keeps_previous() {
        let mut state = DashboardState::default();
        state.apply_event("dashboard_data", serde_json::json!({"totalEvents": 4}));
        assert!(!state.apply_event("dashboard_data", serde_json::json!({"totalEvents": "many"})));
        assert_eq!(state.dashboard.unwrap().total_events, 4);
    }

    #[test]
    fn test_events_prepend_newest_first() {
        let mut state = DashboardState::default();
        state.apply_event("events", serde_json::json!([event("a")]));
        state.apply_event("events", serde_json::json!([event("b"), event("c")]));

        let names: Vec<_> = state
            .live_events
            .iter()
            .map(|e| e.event_name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert!(state.live_events.iter().all(|e| !e.id.is_empty()));
    }

    #[test]
    fn test_live_feed_is_capped() {
        let mut state = DashboardState::default();
        for i in 0..60 {
            state.apply_event("events", serde_json::json!([event(&format!("e{}", i))]));
        }
        assert_eq!(state.live_events.len(), LIVE_EVENTS_CAP);
        assert_eq!(state.live_events[0].event_name, "e59");
        assert_eq!(state.live_events[LIVE_EVENTS_CAP - 1].event_name, "e10");
    }

    #[test]
    fn test_event_counts_are_ignored() {
        let mut state = DashboardState::default();
        assert!(!state.apply_event("events", serde_json::json!({"click": 3})));
        assert!(state.live_events.is_empty());
    }

    #[test]
    fn test_connection_transitions() {
        let mut state = DashboardState::default();
        state.set_connecting();
        assert!(state.connection.connecting);
        state.set_connected();
        assert!(state.connection.connected && !state.connection.connecting);
        state.set_disconnected(Some("Disconnected: transport close".into()));
        assert!(!state.connection.connected);
        assert_eq!(
            state.connection.error.as_deref(),
            Some("Disconnected: transport close")
        );
    }
}
