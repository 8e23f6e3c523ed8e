//! On-disk persistence of the validation session.
//!
//! The file holds the session plus a SHA-256 seal over the session bytes and
//! the host fingerprint. A cache copied from another machine, or edited by
//! hand, fails the seal and is discarded.

use crate::error::ValidatorResult;
use crate::session::ValidationSession;
use callguard_license::HardwareFingerprint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SEAL_DOMAIN: &[u8] = b"callguard-session-v1";

#[derive(Serialize, Deserialize)]
struct CacheFile {
    session: serde_json::Value,
    seal: String,
}

/// Reads and writes the session file for one host.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
    fingerprint_id: String,
}

impl SessionCache {
    /// Cache at `path`, sealed to `fingerprint`.
    pub fn new(path: impl Into<PathBuf>, fingerprint: &HardwareFingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint_id: fingerprint.id().to_string(),
        }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the cached session.
    ///
    /// Returns `Ok(None)` when no file exists or the file is unreadable as a
    /// sealed session; only IO failures other than "not found" are errors.
    pub fn load(&self) -> ValidatorResult<Option<ValidationSession>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: CacheFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding malformed session cache");
                return Ok(None);
            }
        };

        let session_bytes = serde_json::to_vec(&file.session)?;
        if self.seal(&session_bytes) != file.seal {
            warn!(path = %self.path.display(), "Discarding session cache with invalid seal");
            return Ok(None);
        }

        match serde_json::from_value(file.session) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable session cache");
                Ok(None)
            }
        }
    }

    /// Writes the session via a temp file and rename so a crash never leaves
    /// a truncated cache behind.
    pub fn save(&self, session: &ValidationSession) -> ValidatorResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let value = serde_json::to_value(session)?;
        let seal = self.seal(&serde_json::to_vec(&value)?);
        let contents = serde_json::to_vec_pretty(&CacheFile { session: value, seal })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), mode = %session.mode, "Session cache written");
        Ok(())
    }

    fn seal(&self, session_bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(SEAL_DOMAIN);
        hasher.update(self.fingerprint_id.as_bytes());
        hasher.update(session_bytes);
        hex::encode(hasher.finalize())
    }
}
