//! API key management (`/api-key`)

use anyhow::{Context, Result};

use super::{encode_segment, ApiRequest};
use crate::auth::Session;
use crate::models::{
    ApiKeyStatus, CreateApiKeyRequest, DeleteApiKeyResponse, UpdateApiKeyActivationRequest,
    ValidateApiKeyRequest, ValidateApiKeyResponse,
};

const KEYS_PATH: &str = "/api-key";

fn key_path(key: &str) -> String {
    format!("{}/{}", KEYS_PATH, encode_segment(key))
}

pub async fn list_keys_data(session: &Session) -> super::error::Result<Vec<ApiKeyStatus>> {
    session.get_json(ApiRequest::get(KEYS_PATH)).await
}

pub async fn create_key_data(session: &Session, name: &str) -> super::error::Result<ApiKeyStatus> {
    let body = CreateApiKeyRequest {
        name: name.to_string(),
    };
    session.send_json(ApiRequest::post(KEYS_PATH), &body).await
}

pub async fn validate_key_data(
    session: &Session,
    key: &str,
) -> super::error::Result<ValidateApiKeyResponse> {
    let body = ValidateApiKeyRequest {
        api_key: key.to_string(),
    };
    session
        .send_json(ApiRequest::post(format!("{}/validate", KEYS_PATH)), &body)
        .await
}

pub async fn delete_key_data(
    session: &Session,
    key: &str,
) -> super::error::Result<DeleteApiKeyResponse> {
    session.get_json(ApiRequest::delete(key_path(key))).await
}

pub async fn set_key_active_data(
    session: &Session,
    key: &str,
    active: bool,
) -> super::error::Result<ApiKeyStatus> {
    let body = UpdateApiKeyActivationRequest { is_active: active };
    session
        .send_json(ApiRequest::patch(key_path(key)), &body)
        .await
}

/// Keys are shown with only their first and last few characters.
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return key.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

fn print_key(key: &ApiKeyStatus, full: bool) {
    let shown = if full { key.key.clone() } else { mask(&key.key) };
    println!(
        "{}  [{}]",
        key.name.as_deref().unwrap_or("(unnamed)"),
        if key.active { "active" } else { "inactive" }
    );
    println!("  Key:   {}", shown);
    println!("  Usage: {}/{}", key.usage_count, key.usage_limit);
    if let Some(ref created) = key.created_at {
        println!("  Created: {}", created);
    }
}

pub async fn list_keys(session: &Session) -> Result<()> {
    let keys = list_keys_data(session)
        .await
        .context("Failed to list API keys")?;

    println!("\nAPI Keys:");
    println!("{:-<60}", "");
    if keys.is_empty() {
        println!("  (no keys; create one with 'eventify keys create <name>')");
        return Ok(());
    }
    for key in &keys {
        print_key(key, false);
    }
    Ok(())
}

pub async fn create_key(session: &Session, name: &str) -> Result<()> {
    let key = create_key_data(session, name)
        .await
        .context("Failed to create API key")?;
    println!("API key created. Store it now; it is shown in full only once.");
    print_key(&key, true);
    Ok(())
}

pub async fn validate_key(session: &Session, key: &str) -> Result<()> {
    let resp = validate_key_data(session, key)
        .await
        .context("Failed to validate API key")?;
    println!("API key is valid.");
    print_key(&resp.api_key, false);
    Ok(())
}

pub async fn delete_key(session: &Session, key: &str) -> Result<()> {
    let resp = delete_key_data(session, key)
        .await
        .context("Failed to delete API key")?;
    if resp.success {
        println!("API key deleted.");
    } else {
        println!("Delete request accepted.");
    }
    Ok(())
}

pub async fn set_key_active(session: &Session, key: &str, active: bool) -> Result<()> {
    let updated = set_key_active_data(session, key, active)
        .await
        .context("Failed to update API key")?;
    println!(
        "API key {}.",
        if updated.active { "activated" } else { "deactivated" }
    );
    Ok(())
}
