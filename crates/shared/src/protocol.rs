use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MerchantId, PspType};

/// Header carrying the client-minted deduplication token on mutating calls.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMerchantRequest {
    pub business_name: String,
    pub store_url: String,
    pub region: String,
    pub contact_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMerchantResponse {
    pub merchant_id: MerchantId,
    #[serde(default)]
    pub auto_approved: bool,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_kyb_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PspSetupRequest {
    pub merchant_id: MerchantId,
    pub psp_type: PspType,
    pub psp_sandbox_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PspSetupResponse {
    pub api_key: String,
    #[serde(default)]
    pub validated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminActionResponse {
    pub status: String,
}

/// Metadata echoed back for each stored KYC document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocument {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}
