//! Shared test helpers for validator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use callguard_license::protocol::{AuthorizationGrant, HeartbeatRequest};
use callguard_license::{
    HardwareFingerprint, HardwareSources, LicenseKey, LicenseLimits, LicenseWarning, ManualClock,
    RejectionReason,
};
use callguard_validator::resources::StaticResources;
use callguard_validator::{ClientError, LicenseClient, Validator, ValidatorConfig};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const KEY: &str = "7KQM-X4TD-PZ9H-2WNB-RC8F-E6VJ-M3SA-YG5U";
pub const OTHER_KEY: &str = "HB3N-6WQX-Z2KP-RT8M-C4VD-J9FS-YE5G-UA7T";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn key() -> LicenseKey {
    LicenseKey::parse(KEY).unwrap()
}

pub fn other_key() -> LicenseKey {
    LicenseKey::parse(OTHER_KEY).unwrap()
}

pub fn fingerprint() -> HardwareFingerprint {
    HardwareFingerprint::from_sources(&HardwareSources {
        mac_address: Some("3c:ec:ef:12:34:56".to_string()),
        cpu_id: Some("GenuineIntel/6/85/7/Intel(R) Xeon(R) Gold 6130".to_string()),
        board_serial: Some("PF2KXW1A".to_string()),
        machine_id: None,
        hostname: Some("pbx-01".to_string()),
    })
}

pub fn other_fingerprint() -> HardwareFingerprint {
    HardwareFingerprint::from_sources(&HardwareSources {
        mac_address: Some("3c:ec:ef:65:43:21".to_string()),
        cpu_id: Some("AuthenticAMD/25/1/1/AMD EPYC 7543".to_string()),
        board_serial: Some("QX7MRT2B".to_string()),
        machine_id: None,
        hostname: Some("pbx-02".to_string()),
    })
}

/// Grant valid for 30 days from the test start time.
pub fn grant(max_concurrent_calls: u32) -> AuthorizationGrant {
    AuthorizationGrant {
        limits: LicenseLimits {
            max_concurrent_calls,
            max_agents: 10,
            expires_at: start_time() + Duration::days(30),
        },
        warnings: Vec::new(),
    }
}

pub fn grant_with_warnings(max_concurrent_calls: u32, warnings: Vec<LicenseWarning>) -> AuthorizationGrant {
    AuthorizationGrant {
        warnings,
        ..grant(max_concurrent_calls)
    }
}

pub fn transient() -> Result<AuthorizationGrant, ClientError> {
    Err(ClientError::Transient("connection refused".to_string()))
}

pub fn rejected(reason: RejectionReason) -> Result<AuthorizationGrant, ClientError> {
    Err(ClientError::Rejected(reason))
}

/// In-memory [`LicenseClient`] that replays queued responses.
///
/// An empty queue answers with a transient failure.
#[derive(Default)]
pub struct ScriptedClient {
    activations: Mutex<VecDeque<Result<AuthorizationGrant, ClientError>>>,
    heartbeats: Mutex<VecDeque<Result<AuthorizationGrant, ClientError>>>,
    reports: Mutex<Vec<HeartbeatRequest>>,
    activation_calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_activation(&self, response: Result<AuthorizationGrant, ClientError>) {
        self.activations.lock().unwrap().push_back(response);
    }

    pub fn push_heartbeat(&self, response: Result<AuthorizationGrant, ClientError>) {
        self.heartbeats.lock().unwrap().push_back(response);
    }

    pub fn activation_calls(&self) -> usize {
        self.activation_calls.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<HeartbeatRequest> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl LicenseClient for ScriptedClient {
    async fn activate(
        &self,
        _key: &LicenseKey,
        _fingerprint: &str,
    ) -> Result<AuthorizationGrant, ClientError> {
        self.activation_calls.fetch_add(1, Ordering::SeqCst);
        self.activations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(transient)
    }

    async fn heartbeat(
        &self,
        _key: &LicenseKey,
        report: &HeartbeatRequest,
    ) -> Result<AuthorizationGrant, ClientError> {
        self.reports.lock().unwrap().push(report.clone());
        self.heartbeats
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(transient)
    }
}

/// Config with the cache inside `dir` and the default 24h grace window.
pub fn config_in(dir: &Path) -> ValidatorConfig {
    ValidatorConfig {
        license_key: Some(key()),
        cache_path: dir.join("session.json"),
        ..ValidatorConfig::new("http://127.0.0.1:1")
    }
}

/// A validator wired to `client`, a manual clock and fixed host metrics.
pub fn validator_in(dir: &Path, client: Arc<ScriptedClient>) -> (Validator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let validator = Validator::builder(config_in(dir))
        .client(client)
        .clock(clock.clone())
        .fingerprint(fingerprint())
        .resource_probe(Arc::new(StaticResources {
            usage: callguard_license::protocol::ResourceUsage {
                cpu: 12.5,
                ram: 40.0,
                disk: 55.0,
            },
            ip: Some("10.0.0.5"),
        }))
        .build()
        .unwrap();
    (validator, clock)
}
