//! API key models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyStatus {
    pub key: String,
    pub owner_id: String,
    pub active: bool,
    pub usage_count: u64,
    pub usage_limit: u64,
    pub name: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateApiKeyResponse {
    pub api_key: ApiKeyStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiKeyActivationRequest {
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteApiKeyResponse {
    #[serde(default)]
    pub success: bool,
}
