//! Hardware fingerprinting for license binding.
//!
//! A fingerprint is a SHA-256 digest over three independent hardware
//! values: the MAC address of the first physical network interface, a CPU
//! identifier, and the motherboard serial (or DMI product UUID). Values are
//! read from the host but the digest itself is a pure function of
//! [`HardwareSources`], so the same machine always yields the same id.
//!
//! Hosts that expose fewer than two of the three values (containers,
//! some hypervisors) get a degraded fingerprint that also mixes in the OS
//! machine id and hostname. It is flagged [`FingerprintConfidence::Low`]
//! and remains usable for binding.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fmt;

/// Length in hex characters of a fingerprint id.
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Minimum number of primary sources for a high-confidence fingerprint.
pub const MIN_CONFIDENT_SOURCES: usize = 2;

/// Raw hardware values a fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSources {
    /// MAC address of the first physical network interface.
    pub mac_address: Option<String>,
    /// CPU identifier (serial where exposed, otherwise vendor/model signature).
    pub cpu_id: Option<String>,
    /// Motherboard serial or platform UUID.
    pub board_serial: Option<String>,
    /// OS-level machine id, only used for degraded fingerprints.
    pub machine_id: Option<String>,
    /// Hostname, only used for degraded fingerprints.
    pub hostname: Option<String>,
}

impl HardwareSources {
    /// Reads the hardware values of the current host.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            mac_address: get_mac_address(),
            cpu_id: get_cpu_id(),
            board_serial: get_board_serial(),
            machine_id: get_machine_id(),
            hostname: get_hostname(),
        }
    }

    /// Number of primary (MAC, CPU, board) sources present.
    #[must_use]
    pub fn primary_count(&self) -> usize {
        [&self.mac_address, &self.cpu_id, &self.board_serial]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// How much a fingerprint can be trusted to identify one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintConfidence {
    /// At least two primary hardware sources contributed.
    High,
    /// Fewer than two primary sources; fallback values were mixed in.
    Low,
}

/// A stable identifier for this host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareFingerprint {
    id: String,
    confidence: FingerprintConfidence,
}

impl HardwareFingerprint {
    /// Computes the fingerprint of the current host.
    #[must_use]
    pub fn compute() -> Self {
        Self::from_sources(&HardwareSources::collect())
    }

    /// Derives a fingerprint from already collected sources.
    #[must_use]
    pub fn from_sources(sources: &HardwareSources) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"callguard-hw-v1");
        for (label, value) in [
            ("mac", &sources.mac_address),
            ("cpu", &sources.cpu_id),
            ("board", &sources.board_serial),
        ] {
            hasher.update(b"|");
            hasher.update(label.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_deref().unwrap_or("-").as_bytes());
        }

        let confidence = if sources.primary_count() >= MIN_CONFIDENT_SOURCES {
            FingerprintConfidence::High
        } else {
            // OS and arch keep degraded ids from colliding across platforms
            for value in [
                sources.machine_id.as_deref().unwrap_or("-"),
                sources.hostname.as_deref().unwrap_or("-"),
                env::consts::OS,
                env::consts::ARCH,
            ] {
                hasher.update(b"|");
                hasher.update(value.as_bytes());
            }
            FingerprintConfidence::Low
        };

        let hash = hasher.finalize();
        Self {
            id: hex::encode(&hash[..FINGERPRINT_HEX_LEN / 2]),
            confidence,
        }
    }

    /// Returns the fingerprint id sent to the license server.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the confidence level.
    #[must_use]
    pub fn confidence(&self) -> FingerprintConfidence {
        self.confidence
    }

    /// True if fewer than two primary hardware sources were available.
    #[must_use]
    pub fn is_low_confidence(&self) -> bool {
        self.confidence == FingerprintConfidence::Low
    }
}

impl fmt::Display for HardwareFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Checks that a fingerprint id received over the wire has the shape
/// [`HardwareFingerprint`] produces.
#[must_use]
pub fn is_well_formed_fingerprint(id: &str) -> bool {
    id.len() == FINGERPRINT_HEX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Like [`is_well_formed_fingerprint`], but fails with
/// [`LicenseError::InvalidFingerprint`].
pub fn validate_fingerprint(id: &str) -> LicenseResult<()> {
    if is_well_formed_fingerprint(id) {
        Ok(())
    } else {
        Err(LicenseError::InvalidFingerprint(format!(
            "expected {FINGERPRINT_HEX_LEN} lowercase hex characters"
        )))
    }
}

/// Drops empty values and vendor placeholders.
fn normalize(raw: &str) -> Option<String> {
    const PLACEHOLDERS: &[&str] = &[
        "to be filled by o.e.m.",
        "default string",
        "not specified",
        "not applicable",
        "none",
        "0",
        "00:00:00:00:00:00",
        "03000200-0400-0500-0006-000700080009",
    ];
    let value = raw.trim();
    if value.is_empty() || PLACEHOLDERS.contains(&value.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}

/// Gets the machine hostname.
fn get_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .and_then(|h| normalize(&h))
}

/// Gets the MAC address of the first physical network interface.
fn get_mac_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        // Virtual interfaces (bridges, veth, docker) have no backing device
        names
            .iter()
            .filter(|n| *n != "lo")
            .filter(|n| std::path::Path::new(&format!("/sys/class/net/{n}/device")).exists())
            .find_map(|n| {
                std::fs::read_to_string(format!("/sys/class/net/{n}/address"))
                    .ok()
                    .and_then(|s| normalize(&s))
            })
            .map(|s| s.to_ascii_lowercase())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ifconfig")
            .arg("en0")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .map(str::trim)
                    .find(|l| l.starts_with("ether "))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .and_then(normalize)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Gets the CPU serial, or the vendor/model signature where no serial exists.
fn get_cpu_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        let field = |name: &str| {
            cpuinfo
                .lines()
                .find(|l| l.split(':').next().map(str::trim) == Some(name))
                .and_then(|l| l.split_once(':'))
                .and_then(|(_, v)| normalize(v))
        };

        // ARM boards expose a real serial; x86 only exposes the signature
        if let Some(serial) = field("Serial") {
            return Some(serial);
        }
        let parts: Vec<String> = ["vendor_id", "cpu family", "model", "stepping", "model name"]
            .iter()
            .filter_map(|&name| field(name))
            .collect();
        if parts.is_empty() { None } else { Some(parts.join("/")) }
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sysctl")
            .args(["-n", "machdep.cpu.brand_string"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|s| normalize(&s))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Gets the motherboard serial or DMI product UUID.
fn get_board_serial() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        [
            "/sys/class/dmi/id/board_serial",
            "/sys/class/dmi/id/product_uuid",
            "/sys/class/dmi/id/product_serial",
        ]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok().and_then(|s| normalize(&s)))
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformSerialNumber"))
                    .and_then(|l| l.split('"').nth(3))
                    .and_then(normalize)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Gets the OS machine id.
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .and_then(|s| normalize(&s))
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .and_then(normalize)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
