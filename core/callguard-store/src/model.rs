//! License entity and the inputs that create and mutate it.

use callguard_license::protocol::{EXPIRY_WARNING_DAYS, ResourceUsage};
use callguard_license::{LicenseKey, LicenseLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The authority's record of an issued license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub key: LicenseKey,
    pub client_name: String,
    pub client_email: String,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_trial: bool,
    pub active: bool,
    /// Fingerprint of the machine the license is bound to, once activated.
    pub hardware_fingerprint: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub total_calls_processed: u64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_seen_ip: Option<String>,
    pub last_active_calls: u32,
    pub last_active_agents: u32,
    pub last_resources: Option<ResourceUsage>,
}

impl License {
    /// True once `now` has reached the expiration timestamp.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole days left before expiration, zero once expired.
    #[must_use]
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }

    /// True if the license expires within the warning window.
    #[must_use]
    pub fn expires_soon(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && (self.expires_at - now).num_days() < EXPIRY_WARNING_DAYS
    }

    /// The limits a validator is allowed to enforce.
    #[must_use]
    pub fn limits(&self) -> LicenseLimits {
        LicenseLimits {
            max_concurrent_calls: self.max_concurrent_calls,
            max_agents: self.max_agents,
            expires_at: self.expires_at,
        }
    }

    /// Classifies the license for listing and statistics.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> LicenseState {
        if !self.active {
            LicenseState::Deactivated
        } else if self.is_expired_at(now) {
            LicenseState::Expired
        } else {
            LicenseState::Active
        }
    }
}

/// Coarse lifecycle state derived from `active` and the expiration date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseState {
    Active,
    Expired,
    Deactivated,
}

/// Input to [`crate::LicenseStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLicense {
    pub client_name: String,
    pub client_email: String,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    pub validity_days: u32,
    pub is_trial: bool,
}

/// Usage report recorded by [`crate::LicenseStore::record_heartbeat`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSnapshot {
    pub active_calls: u32,
    pub active_agents: u32,
    /// Added to the cumulative call counter.
    pub calls_processed: u64,
    pub source_ip: Option<String>,
    pub resources: ResourceUsage,
}

/// Selects which licenses [`crate::LicenseStore::list`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseFilter {
    #[default]
    All,
    Active,
    Expired,
    Deactivated,
    Trial,
}

impl LicenseFilter {
    /// True if `license` passes this filter at time `now`.
    #[must_use]
    pub fn matches(self, license: &License, now: DateTime<Utc>) -> bool {
        match self {
            Self::All => true,
            Self::Active => license.state_at(now) == LicenseState::Active,
            Self::Expired => license.state_at(now) == LicenseState::Expired,
            Self::Deactivated => license.state_at(now) == LicenseState::Deactivated,
            Self::Trial => license.is_trial,
        }
    }
}

/// Aggregate counts over every stored license.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseStats {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
    pub deactivated: u64,
    pub trial: u64,
    pub bound: u64,
    pub total_calls_processed: u64,
}

/// Kinds of lifecycle change recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseEventKind {
    Created,
    HardwareBound,
    BindingReset,
    Extended,
    Deactivated,
    Reactivated,
}

impl LicenseEventKind {
    /// Stable name stored in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::HardwareBound => "hardware_bound",
            Self::BindingReset => "binding_reset",
            Self::Extended => "extended",
            Self::Deactivated => "deactivated",
            Self::Reactivated => "reactivated",
        }
    }
}

impl fmt::Display for LicenseEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "hardware_bound" => Ok(Self::HardwareBound),
            "binding_reset" => Ok(Self::BindingReset),
            "extended" => Ok(Self::Extended),
            "deactivated" => Ok(Self::Deactivated),
            "reactivated" => Ok(Self::Reactivated),
            other => Err(format!("unknown license event kind: {other}")),
        }
    }
}

/// One entry of a license's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseEvent {
    pub kind: LicenseEventKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}
