//! Request and response bodies of the operator endpoints.
//!
//! Validator-facing bodies live in [`callguard_license::protocol`].

use callguard_license::protocol::ResourceUsage;
use callguard_store::{License, LicenseEvent, LicenseFilter, LicenseState, LicenseStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `PUT /api/license/{key}/extend` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub days: i64,
}

/// Query string of `GET /api/license/list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: LicenseFilter,
}

/// Full projection of a license for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub license_key: String,
    pub client_name: String,
    pub client_email: String,
    pub state: LicenseState,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
    pub is_expired: bool,
    pub is_trial: bool,
    pub active: bool,
    pub hardware_fingerprint: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub total_calls_processed: u64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_seen_ip: Option<String>,
    pub last_active_calls: u32,
    pub last_active_agents: u32,
    pub last_resources: Option<ResourceUsage>,
    #[serde(default)]
    pub history: Vec<LicenseEvent>,
}

impl LicenseInfo {
    /// Projects `license` as seen at `now`.
    pub fn new(license: License, history: Vec<LicenseEvent>, now: DateTime<Utc>) -> Self {
        Self {
            state: license.state_at(now),
            days_remaining: license.days_remaining(now),
            is_expired: license.is_expired_at(now),
            license_key: license.key.to_string(),
            client_name: license.client_name,
            client_email: license.client_email,
            max_concurrent_calls: license.max_concurrent_calls,
            max_agents: license.max_agents,
            issued_at: license.issued_at,
            expires_at: license.expires_at,
            is_trial: license.is_trial,
            active: license.active,
            hardware_fingerprint: license.hardware_fingerprint,
            activated_at: license.activated_at,
            total_calls_processed: license.total_calls_processed,
            last_heartbeat_at: license.last_heartbeat_at,
            last_seen_ip: license.last_seen_ip,
            last_active_calls: license.last_active_calls,
            last_active_agents: license.last_active_agents,
            last_resources: license.last_resources,
            history,
        }
    }
}

/// One row of `GET /api/license/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSummary {
    pub license_key: String,
    pub client_name: String,
    pub client_email: String,
    pub state: LicenseState,
    pub is_trial: bool,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
    pub hardware_bound: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl LicenseSummary {
    pub fn new(license: &License, now: DateTime<Utc>) -> Self {
        Self {
            license_key: license.key.to_string(),
            client_name: license.client_name.clone(),
            client_email: license.client_email.clone(),
            state: license.state_at(now),
            is_trial: license.is_trial,
            expires_at: license.expires_at,
            days_remaining: license.days_remaining(now),
            hardware_bound: license.hardware_fingerprint.is_some(),
            last_heartbeat_at: license.last_heartbeat_at,
        }
    }
}

/// `GET /api/license/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub count: usize,
    pub licenses: Vec<LicenseSummary>,
}

/// `GET /api/license/stats/summary` response.
pub type StatsResponse = LicenseStats;

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
