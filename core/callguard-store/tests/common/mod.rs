//! Shared test helpers for store tests.

#![allow(dead_code)]

use callguard_license::protocol::ResourceUsage;
use callguard_license::ManualClock;
use callguard_store::{HeartbeatSnapshot, LicenseStore, NewLicense};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Returns an in-memory store and the clock driving it.
pub fn test_store() -> (LicenseStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = LicenseStore::open_in_memory(clock.clone()).unwrap();
    (store, clock)
}

pub fn new_license(name: &str, days: u32) -> NewLicense {
    NewLicense {
        client_name: name.to_string(),
        client_email: format!("{}@example.test", name.to_lowercase()),
        max_concurrent_calls: 5,
        max_agents: 2,
        validity_days: days,
        is_trial: false,
    }
}

pub fn snapshot(active_calls: u32, calls_processed: u64) -> HeartbeatSnapshot {
    HeartbeatSnapshot {
        active_calls,
        active_agents: 1,
        calls_processed,
        source_ip: Some("10.1.2.3".to_string()),
        resources: ResourceUsage {
            cpu: 10.0,
            ram: 20.0,
            disk: 30.0,
        },
    }
}
