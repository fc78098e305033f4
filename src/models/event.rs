//! Stored event models and list filters

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    SeverityUnspecified,
    Info,
    Warn,
    Error,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeverityUnspecified => "SEVERITY_UNSPECIFIED",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for EventSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEVERITY_UNSPECIFIED" => Ok(Self::SeverityUnspecified),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Event as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub event_name: String,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub severity: EventSeverity,
    pub timestamp: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Filters for `GET /events`
#[derive(Debug, Clone, Default)]
pub struct EventsFilters {
    /// 1-based
    pub page: Option<u32>,
    /// Backend caps this at 200
    pub limit: Option<u32>,
    pub event_name: Option<String>,
    pub category: Option<String>,
    pub severity: Option<EventSeverity>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub tags: Vec<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 25;
pub const MAX_LIMIT: u32 = 200;

impl EventsFilters {
    /// Query pairs for the list endpoint. Empty values are omitted and tags
    /// repeat the `tags` key once per value.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), self.page.unwrap_or(DEFAULT_PAGE).max(1).to_string()),
            (
                "limit".to_string(),
                self.limit
                    .unwrap_or(DEFAULT_LIMIT)
                    .clamp(1, MAX_LIMIT)
                    .to_string(),
            ),
        ];

        let mut push = |key: &str, value: Option<&str>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                query.push((key.to_string(), v.to_string()));
            }
        };
        push("eventName", self.event_name.as_deref());
        push("category", self.category.as_deref());
        push("severity", self.severity.as_ref().map(EventSeverity::as_str));
        push("fromDate", self.from_date.as_deref());
        push("toDate", self.to_date.as_deref());
        push("sortBy", self.sort_by.as_deref());
        push("sortOrder", self.sort_order.as_deref());

        for tag in self.tags.iter().filter(|t| !t.is_empty()) {
            query.push(("tags".to_string(), tag.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsResponse {
    pub events: Vec<EventItem>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteBatchRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub deleted_count: u64,
}
