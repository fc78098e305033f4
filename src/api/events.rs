//! Stored events (`/events`)

use anyhow::{bail, Context, Result};

use super::{encode_segment, ApiRequest};
use crate::auth::Session;
use crate::models::{DeleteBatchRequest, DeleteResponse, EventsFilters, GetEventsResponse};

const EVENTS_PATH: &str = "/events";

pub async fn list_events_data(
    session: &Session,
    filters: &EventsFilters,
) -> super::error::Result<GetEventsResponse> {
    session
        .get_json(ApiRequest::get(EVENTS_PATH).query(filters.to_query()))
        .await
}

pub async fn delete_event_data(session: &Session, id: &str) -> super::error::Result<DeleteResponse> {
    let path = format!("{}/{}", EVENTS_PATH, encode_segment(id));
    session.get_json(ApiRequest::delete(path)).await
}

pub async fn delete_events_batch_data(
    session: &Session,
    ids: Vec<String>,
) -> super::error::Result<DeleteResponse> {
    session
        .send_json(ApiRequest::delete(EVENTS_PATH), &DeleteBatchRequest { ids })
        .await
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// List events matching `filters` (prints to stdout).
pub async fn list_events(session: &Session, filters: &EventsFilters) -> Result<()> {
    let resp = list_events_data(session, filters)
        .await
        .context("Failed to fetch events")?;

    println!(
        "\nEvents (page {}/{}, {} per page, {} total):",
        resp.page,
        resp.total_pages.max(1),
        resp.limit,
        resp.total
    );
    println!("{:-<72}", "");

    if resp.events.is_empty() {
        println!("  (no events found)");
        return Ok(());
    }

    for event in &resp.events {
        let when = event.timestamp.as_deref().unwrap_or(&event.created_at);
        println!(
            "{:<7} {}  {}",
            event.severity.as_str(),
            when,
            event.event_name
        );
        println!("  ID: {}", event.id);
        if let Some(ref category) = event.category {
            println!("  Category: {}", category);
        }
        if !event.tags.is_empty() {
            println!("  Tags: {}", event.tags.join(", "));
        }
        if !event.payload.is_empty() {
            let payload = serde_json::Value::Object(event.payload.clone()).to_string();
            println!("  Payload: {}", truncate(&payload, 80));
        }
    }
    Ok(())
}

/// Delete one event, or several in a single batch call.
pub async fn delete_events(session: &Session, ids: Vec<String>) -> Result<()> {
    let resp = match ids.len() {
        0 => bail!("No event IDs given"),
        1 => delete_event_data(session, &ids[0]).await,
        _ => delete_events_batch_data(session, ids).await,
    }
    .context("Failed to delete events")?;

    if resp.message.is_empty() {
        println!("Deleted {} event(s).", resp.deleted_count);
    } else {
        println!("{}", resp.message);
    }
    Ok(())
}
