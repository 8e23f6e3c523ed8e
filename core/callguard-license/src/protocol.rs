//! Wire types shared by the license server and the embedded validator.
//!
//! Numeric request fields are signed so that negative values reach input
//! validation and come back as `VALIDATION_ERROR` instead of a JSON
//! decoding failure.

use crate::key::LicenseKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of the `status` field on every successful validator response.
pub const STATUS_ACTIVE: &str = "active";

/// Days before expiration at which responses start carrying
/// [`LicenseWarning::ExpiringSoon`].
pub const EXPIRY_WARNING_DAYS: i64 = 7;

// ── Issuance ─────────────────────────────────────────────────────

/// `POST /api/license/generate` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub client_name: String,
    pub client_email: String,
    pub max_concurrent_calls: i64,
    pub max_agents: i64,
    pub validity_days: i64,
    #[serde(default)]
    pub is_trial: bool,
}

/// `POST /api/license/generate` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub license_key: LicenseKey,
    pub expires_at: DateTime<Utc>,
}

// ── Validator-facing ─────────────────────────────────────────────

/// Limits the server grants to a bound installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLimits {
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    pub expires_at: DateTime<Utc>,
}

/// Non-fatal conditions the server flags on a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseWarning {
    /// Reported active calls exceed `max_concurrent_calls`.
    LimitExceeded,
    /// Fewer than [`EXPIRY_WARNING_DAYS`] days remain.
    ExpiringSoon,
}

/// `POST /api/license/{key}/activate` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub hardware_fingerprint: String,
}

/// `POST /api/license/{key}/activate` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub status: String,
    #[serde(flatten)]
    pub limits: LicenseLimits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<LicenseWarning>,
}

/// Host resource utilization, each as a percentage in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f32,
    pub ram: f32,
    pub disk: f32,
}

/// `POST /api/license/{key}/heartbeat` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub hardware_fingerprint: String,
    pub active_calls: i64,
    pub active_agents: i64,
    /// Calls admitted since the last accepted heartbeat.
    #[serde(default)]
    pub calls_processed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(flatten)]
    pub resources: ResourceUsage,
}

/// `POST /api/license/{key}/heartbeat` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub limits: LicenseLimits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<LicenseWarning>,
}

/// What a validator learns from any successful server contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub limits: LicenseLimits,
    pub warnings: Vec<LicenseWarning>,
}

impl From<ActivateResponse> for AuthorizationGrant {
    fn from(resp: ActivateResponse) -> Self {
        Self {
            limits: resp.limits,
            warnings: resp.warnings,
        }
    }
}

impl From<HeartbeatResponse> for AuthorizationGrant {
    fn from(resp: HeartbeatResponse) -> Self {
        Self {
            limits: resp.limits,
            warnings: resp.warnings,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// Machine-readable error code carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Expired,
    Deactivated,
    UnauthorizedHardware,
    ValidationError,
    Unauthorized,
    InternalError,
}

impl ErrorCode {
    /// The authoritative rejection this code stands for, if any.
    #[must_use]
    pub fn rejection(self) -> Option<RejectionReason> {
        match self {
            Self::NotFound => Some(RejectionReason::NotFound),
            Self::Expired => Some(RejectionReason::Expired),
            Self::Deactivated => Some(RejectionReason::Deactivated),
            Self::UnauthorizedHardware => Some(RejectionReason::UnauthorizedHardware),
            Self::ValidationError | Self::Unauthorized | Self::InternalError => None,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

/// An authoritative, non-retryable refusal from the license server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The server has no record of the key.
    NotFound,
    /// The license is past its expiration date.
    Expired,
    /// An operator deactivated the license.
    Deactivated,
    /// The license is bound to a different machine.
    UnauthorizedHardware,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "license key not recognised",
            Self::Expired => "license expired",
            Self::Deactivated => "license deactivated",
            Self::UnauthorizedHardware => "license bound to different hardware",
        };
        f.write_str(s)
    }
}
