//! Validator configuration.

use callguard_license::LicenseKey;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between revalidations (1 hour).
pub const DEFAULT_REVALIDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default interval between heartbeats (5 minutes).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default offline grace window (24 hours).
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`crate::Validator`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Base URL of the license server, e.g. `https://licenses.example.com:8443`.
    pub server_url: String,
    /// Key to use when no cached session exists.
    pub license_key: Option<LicenseKey>,
    /// Location of the persisted session.
    pub cache_path: PathBuf,
    pub revalidate_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long the validator keeps admitting calls after the server becomes
    /// unreachable.
    pub grace_window: Duration,
    pub request_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".to_string(),
            license_key: None,
            cache_path: default_cache_path(),
            revalidate_interval: DEFAULT_REVALIDATE_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            grace_window: DEFAULT_GRACE_WINDOW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ValidatorConfig {
    /// Config pointing at `server_url` with every other field defaulted.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Grace window as a chrono duration, saturating on overflow.
    pub(crate) fn grace_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.grace_window).unwrap_or(chrono::Duration::MAX)
    }
}

/// `<local data dir>/callguard/session.json`, or the working directory when
/// the platform has no data dir.
fn default_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("callguard")
        .join("session.json")
}
