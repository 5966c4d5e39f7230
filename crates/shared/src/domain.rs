use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque merchant identifier assigned by the backend at registration
/// (`merch_*` in practice). Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantId(pub String);

impl MerchantId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-driven verification state. The backend owns every transition; the
/// client only mirrors it. `Unknown` captures any future server-side enum
/// extension without failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    PendingVerification,
    Approved,
    Rejected,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PspType {
    Stripe,
    Adyen,
    Shoppay,
}

impl PspType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PspType::Stripe => "stripe",
            PspType::Adyen => "adyen",
            PspType::Shoppay => "shoppay",
        }
    }
}

impl fmt::Display for PspType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PspType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "stripe" => Ok(PspType::Stripe),
            "adyen" => Ok(PspType::Adyen),
            "shoppay" => Ok(PspType::Shoppay),
            other => Err(format!("unsupported psp type '{other}'")),
        }
    }
}

/// The client's read-only projection of the server-owned onboarding row.
/// Eventually stale by construction; refreshed via the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    pub merchant_id: MerchantId,
    #[serde(default)]
    pub business_name: String,
    pub kyc_status: KycStatus,
    #[serde(default)]
    pub psp_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psp_type: Option<PspType>,
    #[serde(default)]
    pub api_key_issued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Client-derived onboarding phase. `Inconsistent` flags a record claiming a
/// PSP connection without an approved KYC status, a combination the business
/// rules say cannot happen; it is surfaced to an operator instead of being
/// rendered as `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Register,
    Kyc,
    Psp,
    Complete,
    Inconsistent,
}

impl OnboardingStep {
    /// Terminal steps end any poll loop: there is no later server transition
    /// the client is waiting to observe.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OnboardingStep::Complete | OnboardingStep::Inconsistent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStep::Register => "register",
            OnboardingStep::Kyc => "kyc",
            OnboardingStep::Psp => "psp",
            OnboardingStep::Complete => "complete",
            OnboardingStep::Inconsistent => "inconsistent",
        }
    }
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardingStep {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "register" => Ok(OnboardingStep::Register),
            "kyc" => Ok(OnboardingStep::Kyc),
            "psp" => Ok(OnboardingStep::Psp),
            "complete" => Ok(OnboardingStep::Complete),
            "inconsistent" => Ok(OnboardingStep::Inconsistent),
            other => Err(format!("unrecognized onboarding step '{other}'")),
        }
    }
}

/// Single source of truth for "given a record, which step is it in". Total:
/// every record shape maps to exactly one step, and an absent record means
/// registration has not happened yet.
///
/// A rejected merchant goes back to `Register`; an unrecognized verification
/// status parks the flow on `Kyc`, since a record exists and re-registering
/// would create a duplicate merchant server-side.
pub fn derive_step(record: Option<&OnboardingRecord>) -> OnboardingStep {
    let Some(record) = record else {
        return OnboardingStep::Register;
    };

    match (record.psp_connected, &record.kyc_status) {
        (true, KycStatus::Approved) => OnboardingStep::Complete,
        (true, _) => OnboardingStep::Inconsistent,
        (false, KycStatus::Approved) => OnboardingStep::Psp,
        (false, KycStatus::PendingVerification) => OnboardingStep::Kyc,
        (false, KycStatus::Rejected) => OnboardingStep::Register,
        (false, KycStatus::Unknown(_)) => OnboardingStep::Kyc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kyc_status: KycStatus, psp_connected: bool) -> OnboardingRecord {
        OnboardingRecord {
            merchant_id: MerchantId::new("merch_123"),
            business_name: "Acme Store".to_string(),
            kyc_status,
            psp_connected,
            psp_type: psp_connected.then_some(PspType::Stripe),
            api_key_issued: psp_connected,
            rejection_reason: None,
            created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
            verified_at: None,
        }
    }

    #[test]
    fn absent_record_derives_register() {
        assert_eq!(derive_step(None), OnboardingStep::Register);
    }

    #[test]
    fn pending_verification_derives_kyc() {
        let record = record(KycStatus::PendingVerification, false);
        assert_eq!(derive_step(Some(&record)), OnboardingStep::Kyc);
    }

    #[test]
    fn approved_without_psp_derives_psp() {
        let record = record(KycStatus::Approved, false);
        assert_eq!(derive_step(Some(&record)), OnboardingStep::Psp);
    }

    #[test]
    fn approved_with_psp_derives_complete() {
        let record = record(KycStatus::Approved, true);
        assert_eq!(derive_step(Some(&record)), OnboardingStep::Complete);
    }

    #[test]
    fn rejected_derives_register() {
        let record = record(KycStatus::Rejected, false);
        assert_eq!(derive_step(Some(&record)), OnboardingStep::Register);
    }

    #[test]
    fn psp_connection_without_approval_is_inconsistent_not_complete() {
        for kyc_status in [
            KycStatus::PendingVerification,
            KycStatus::Rejected,
            KycStatus::Unknown("escalated".to_string()),
        ] {
            let record = record(kyc_status, true);
            assert_eq!(derive_step(Some(&record)), OnboardingStep::Inconsistent);
        }
    }

    #[test]
    fn unrecognized_kyc_status_parks_on_kyc() {
        let record = record(KycStatus::Unknown("under_manual_review".to_string()), false);
        assert_eq!(derive_step(Some(&record)), OnboardingStep::Kyc);
    }

    #[test]
    fn derivation_is_pure() {
        let record = record(KycStatus::PendingVerification, false);
        assert_eq!(derive_step(Some(&record)), derive_step(Some(&record)));
    }

    #[test]
    fn unknown_kyc_status_survives_deserialization() {
        let record: OnboardingRecord = serde_json::from_str(
            r#"{
                "merchant_id": "merch_9",
                "business_name": "Acme",
                "kyc_status": "escalated_review",
                "psp_connected": false,
                "api_key_issued": false,
                "created_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .expect("record with future status value must still parse");
        assert_eq!(
            record.kyc_status,
            KycStatus::Unknown("escalated_review".to_string())
        );
    }

    #[test]
    fn step_round_trips_through_its_string_form() {
        for step in [
            OnboardingStep::Register,
            OnboardingStep::Kyc,
            OnboardingStep::Psp,
            OnboardingStep::Complete,
            OnboardingStep::Inconsistent,
        ] {
            assert_eq!(step.as_str().parse::<OnboardingStep>(), Ok(step));
        }
    }
}
