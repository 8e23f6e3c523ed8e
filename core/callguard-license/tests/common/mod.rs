//! Shared test helpers for license tests.

#![allow(dead_code)]

use callguard_license::HardwareSources;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Returns an RNG with a fixed seed so generated keys are reproducible.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Sources of a fully instrumented bare-metal host.
pub fn full_sources() -> HardwareSources {
    HardwareSources {
        mac_address: Some("3c:ec:ef:12:34:56".to_string()),
        cpu_id: Some("GenuineIntel/6/85/7/Intel(R) Xeon(R) Gold 6130".to_string()),
        board_serial: Some("PF2KXW1A".to_string()),
        machine_id: Some("2f6a1d0c9b8e4f7a8c3d2e1f0a9b8c7d".to_string()),
        hostname: Some("pbx-01".to_string()),
    }
}

/// Sources of a container that only exposes a CPU signature.
pub fn container_sources() -> HardwareSources {
    HardwareSources {
        mac_address: None,
        cpu_id: Some("AuthenticAMD/25/1/1/AMD EPYC 7543".to_string()),
        board_serial: None,
        machine_id: Some("8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a".to_string()),
        hostname: Some("pbx-container".to_string()),
    }
}
