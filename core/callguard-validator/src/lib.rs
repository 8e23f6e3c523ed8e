//! License validator embedded in the protected CallGuard application.
//!
//! The [`Validator`] answers "may I accept one more call?" from in-memory
//! state alone, while [`BackgroundTasks`] keep that state fresh by
//! revalidating with the license server and sending usage heartbeats.
//!
//! ```no_run
//! use callguard_validator::{BackgroundTasks, Validator, ValidatorConfig};
//!
//! # async fn run() -> callguard_validator::ValidatorResult<()> {
//! let validator = Validator::new(ValidatorConfig::new("https://licenses.example.com"))?;
//! let tasks = BackgroundTasks::spawn(validator.clone());
//!
//! if let Some(permit) = validator.try_admit_call() {
//!     // handle the call; dropping `permit` ends it
//!     drop(permit);
//! }
//!
//! tasks.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! When the server cannot be reached the validator keeps admitting calls for
//! a bounded grace window. An explicit rejection from the server ends the
//! session immediately and only a fresh key entry starts a new one.

mod cache;
mod client;
mod config;
mod error;
pub mod resources;
mod session;
mod tasks;
mod validator;

pub use cache::SessionCache;
pub use client::{HttpLicenseClient, LicenseClient};
pub use config::{
    ValidatorConfig, DEFAULT_GRACE_WINDOW, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_REVALIDATE_INTERVAL,
};
pub use error::{ClientError, ValidatorError, ValidatorResult};
pub use session::{SessionMode, TerminalCause, Transition, ValidationSession};
pub use tasks::BackgroundTasks;
pub use validator::{CallPermit, Validator, ValidatorBuilder};
