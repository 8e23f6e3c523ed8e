//! License record store for the CallGuard license server.
//!
//! The store is the authority's durable view of every issued license:
//! limits, expiration, the bound hardware fingerprint and the usage
//! counters reported by heartbeats.
//!
//! # Guarantees
//!
//! - A license is bound to at most one fingerprint until an operator
//!   resets the binding
//! - Heartbeats for the same key never lose counter updates
//! - Records are never deleted; lifecycle changes are kept as an audit trail

mod error;
mod model;
mod store;

pub use error::{StoreError, StoreResult};
pub use model::{
    HeartbeatSnapshot, License, LicenseEvent, LicenseEventKind, LicenseFilter, LicenseState,
    LicenseStats, NewLicense,
};
pub use store::{LicenseStore, MAX_KEY_ATTEMPTS};
