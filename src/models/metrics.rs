//! Live dashboard payloads pushed over the stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single event in the live feed.
///
/// The backend omits `id` for some producers; one is generated locally so the
/// feed can still be keyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    #[serde(default = "generate_id")]
    pub id: String,
    pub event_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub time_ago: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub avg_response_time: f64,
    pub processing_rate: f64,
    pub error_rate: f64,
    pub uptime: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumePoint {
    pub time: String,
    pub events: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSlice {
    pub name: String,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryCount {
    pub country: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCount {
    pub device: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferrerCount {
    pub referrer: String,
    pub count: u64,
}

/// Full dashboard snapshot (`dashboard_data` stream event)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsDashboard {
    pub total_events: u64,
    pub total_events_change: f64,
    pub active_users: u64,
    pub active_users_change: f64,
    pub events_per_hour: f64,
    pub events_per_hour_change: f64,
    pub conversion_rate: f64,
    pub conversion_rate_change: f64,
    pub event_volume_data: Vec<VolumePoint>,
    pub top_events: Vec<NamedCount>,
    pub event_distribution: Vec<DistributionSlice>,
    pub geographic_distribution: Vec<CountryCount>,
    pub device_types: Vec<DeviceCount>,
    pub top_referrers: Vec<ReferrerCount>,
    pub performance_metrics: PerformanceMetrics,
    pub live_events: Vec<LiveEvent>,
}
