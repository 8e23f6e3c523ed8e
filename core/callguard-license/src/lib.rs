//! Licensing primitives shared by the CallGuard license server and the
//! validator embedded in the protected application.
//!
//! This crate handles:
//! - License key generation and parsing (8 groups of 4, unambiguous alphabet)
//! - Hardware fingerprinting for machine binding
//! - The JSON wire protocol spoken between validator and server
//! - A [`Clock`] abstraction for time-dependent checks
//!
//! # License Key Format
//!
//! Keys look like `7KQM-X4TD-PZ9H-2WNB-RC8F-E6VJ-M3SA-YG5U`. A key is the
//! client's only secret; the server is the sole authority on what it grants.

mod clock;
mod device;
mod error;
mod key;
pub mod protocol;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{
    is_well_formed_fingerprint, validate_fingerprint, FingerprintConfidence, HardwareFingerprint,
    HardwareSources, FINGERPRINT_HEX_LEN, MIN_CONFIDENT_SOURCES,
};
pub use error::{LicenseError, LicenseResult};
pub use key::{LicenseKey, KEY_ALPHABET, KEY_GROUPS, KEY_GROUP_LEN};
pub use protocol::{LicenseLimits, LicenseWarning, RejectionReason};
