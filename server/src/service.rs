//! License authority logic over the record store.
//!
//! Every method is synchronous and may block on SQLite; handlers call them
//! through `spawn_blocking`.

use crate::api::{LicenseInfo, LicenseSummary, ListResponse};
use crate::error::{AppError, AppResult};
use callguard_license::protocol::{
    ActivateResponse, GenerateRequest, GenerateResponse, HeartbeatRequest, HeartbeatResponse,
    ResourceUsage, STATUS_ACTIVE,
};
use callguard_license::{validate_fingerprint, LicenseKey, LicenseWarning};
use callguard_store::{
    HeartbeatSnapshot, License, LicenseFilter, LicenseStats, LicenseStore, NewLicense,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Longest validity or extension accepted in one request (100 years).
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

const MAX_NAME_LEN: usize = 200;

/// Issues, validates and manages licenses.
pub struct LicenseService {
    store: LicenseStore,
}

impl LicenseService {
    pub fn new(store: LicenseStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LicenseStore {
        &self.store
    }

    /// Creates a license from an operator request.
    pub fn generate(&self, req: GenerateRequest) -> AppResult<GenerateResponse> {
        let client_name = req.client_name.trim();
        if client_name.is_empty() {
            return Err(AppError::Validation("client_name must not be empty".to_string()));
        }
        if client_name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "client_name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        let client_email = req.client_email.trim();
        if !client_email.contains('@') {
            return Err(AppError::Validation("client_email must be an email address".to_string()));
        }

        let spec = NewLicense {
            client_name: client_name.to_string(),
            client_email: client_email.to_string(),
            max_concurrent_calls: positive_u32("max_concurrent_calls", req.max_concurrent_calls)?,
            max_agents: positive_u32("max_agents", req.max_agents)?,
            validity_days: days("validity_days", req.validity_days)?,
            is_trial: req.is_trial,
        };

        let license = self.store.create(&spec)?;
        info!(
            license_key = %license.key.masked(),
            client = %license.client_name,
            trial = license.is_trial,
            expires_at = %license.expires_at,
            "license issued"
        );
        Ok(GenerateResponse {
            license_key: license.key,
            expires_at: license.expires_at,
        })
    }

    /// Validates `key` for the machine `fingerprint`, binding it on first use.
    pub fn activate(&self, key: &LicenseKey, fingerprint: &str) -> AppResult<ActivateResponse> {
        check_fingerprint(fingerprint)?;
        let now = self.store.now();
        let license = self.authorize(key, fingerprint, now)?;
        Ok(ActivateResponse {
            status: STATUS_ACTIVE.to_string(),
            limits: license.limits(),
            warnings: expiry_warning(&license, now).into_iter().collect(),
        })
    }

    /// Re-checks the license, then records the usage report.
    pub fn heartbeat(
        &self,
        key: &LicenseKey,
        req: &HeartbeatRequest,
    ) -> AppResult<HeartbeatResponse> {
        check_fingerprint(&req.hardware_fingerprint)?;
        let snapshot = HeartbeatSnapshot {
            active_calls: non_negative_u32("active_calls", req.active_calls)?,
            active_agents: non_negative_u32("active_agents", req.active_agents)?,
            calls_processed: u64::try_from(req.calls_processed).map_err(|_| {
                AppError::Validation("calls_processed must not be negative".to_string())
            })?,
            source_ip: req
                .server_ip
                .as_deref()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string),
            resources: check_resources(req.resources)?,
        };

        let now = self.store.now();
        self.authorize(key, &req.hardware_fingerprint, now)?;
        let license = self.store.record_heartbeat(key, &snapshot)?;

        let mut warnings = Vec::new();
        if snapshot.active_calls > license.max_concurrent_calls
            || snapshot.active_agents > license.max_agents
        {
            warn!(
                license_key = %key.masked(),
                active_calls = snapshot.active_calls,
                max_concurrent_calls = license.max_concurrent_calls,
                active_agents = snapshot.active_agents,
                max_agents = license.max_agents,
                "heartbeat reports usage above license limits"
            );
            warnings.push(LicenseWarning::LimitExceeded);
        }
        warnings.extend(expiry_warning(&license, now));

        Ok(HeartbeatResponse {
            status: STATUS_ACTIVE.to_string(),
            limits: license.limits(),
            warnings,
        })
    }

    pub fn info(&self, key: &LicenseKey) -> AppResult<LicenseInfo> {
        let license = self.store.get(key)?;
        self.project(license)
    }

    pub fn list(&self, filter: LicenseFilter) -> AppResult<ListResponse> {
        let now = self.store.now();
        let licenses: Vec<LicenseSummary> = self
            .store
            .list(filter)?
            .iter()
            .map(|license| LicenseSummary::new(license, now))
            .collect();
        Ok(ListResponse {
            count: licenses.len(),
            licenses,
        })
    }

    pub fn stats(&self) -> AppResult<LicenseStats> {
        Ok(self.store.stats()?)
    }

    pub fn extend(&self, key: &LicenseKey, requested_days: i64) -> AppResult<LicenseInfo> {
        let extra = days("days", requested_days)?;
        let license = self.store.extend(key, extra)?;
        info!(license_key = %key.masked(), days = extra, expires_at = %license.expires_at, "license extended");
        self.project(license)
    }

    pub fn deactivate(&self, key: &LicenseKey) -> AppResult<LicenseInfo> {
        let license = self.store.deactivate(key)?;
        info!(license_key = %key.masked(), "license deactivated");
        self.project(license)
    }

    pub fn reactivate(&self, key: &LicenseKey) -> AppResult<LicenseInfo> {
        let license = self.store.reactivate(key)?;
        info!(license_key = %key.masked(), "license reactivated");
        self.project(license)
    }

    pub fn reset_hardware(&self, key: &LicenseKey) -> AppResult<LicenseInfo> {
        let license = self.store.reset_binding(key)?;
        info!(license_key = %key.masked(), "hardware binding reset");
        self.project(license)
    }

    /// Checks existence, expiry and the active flag in that order, then
    /// binds or verifies the hardware.
    fn authorize(
        &self,
        key: &LicenseKey,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> AppResult<License> {
        let license = self.store.get(key)?;
        if license.is_expired_at(now) {
            info!(license_key = %key.masked(), "refused expired license");
            return Err(AppError::Expired);
        }
        if !license.active {
            info!(license_key = %key.masked(), "refused deactivated license");
            return Err(AppError::Deactivated);
        }
        Ok(self.store.bind_hardware(key, fingerprint)?)
    }

    fn project(&self, license: License) -> AppResult<LicenseInfo> {
        let history = self.store.history(&license.key)?;
        Ok(LicenseInfo::new(license, history, self.store.now()))
    }
}

fn expiry_warning(license: &License, now: DateTime<Utc>) -> Option<LicenseWarning> {
    license.expires_soon(now).then_some(LicenseWarning::ExpiringSoon)
}

fn check_fingerprint(fingerprint: &str) -> AppResult<()> {
    Ok(validate_fingerprint(fingerprint)?)
}

fn check_resources(usage: ResourceUsage) -> AppResult<ResourceUsage> {
    for (name, value) in [("cpu", usage.cpu), ("ram", usage.ram), ("disk", usage.disk)] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(AppError::Validation(format!("{name} must be a percentage between 0 and 100")));
        }
    }
    Ok(usage)
}

fn positive_u32(field: &str, value: i64) -> AppResult<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(AppError::Validation(format!("{field} must be a positive integer"))),
    }
}

fn non_negative_u32(field: &str, value: i64) -> AppResult<u32> {
    u32::try_from(value)
        .map_err(|_| AppError::Validation(format!("{field} must not be negative")))
}

fn days(field: &str, value: i64) -> AppResult<u32> {
    if !(1..=MAX_VALIDITY_DAYS).contains(&value) {
        return Err(AppError::Validation(format!(
            "{field} must be between 1 and {MAX_VALIDITY_DAYS}"
        )));
    }
    u32::try_from(value).map_err(|_| AppError::Validation(format!("{field} is out of range")))
}
