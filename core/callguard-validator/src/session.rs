//! The validator's view of its license and the transitions between modes.
//!
//! Every transition here is a pure function of the current session, the
//! event and the time it happened. The [`crate::Validator`] applies them
//! under its lock and persists the result.
//!
//! ```text
//! Unvalidated --grant--> Online --network failure--> Grace --grant--> Online
//!      |                   |                           |
//!      |                   +--rejection--+             +--window elapsed--> Expired
//!      +--rejection-----------------------+--> Expired | UnauthorizedHardware
//! ```

use callguard_license::protocol::AuthorizationGrant;
use callguard_license::{LicenseKey, LicenseLimits, LicenseWarning, RejectionReason};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the validator stands with the license server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// A key is present but the server has not confirmed it yet.
    Unvalidated,
    /// The last server contact confirmed the license.
    Online,
    /// The server is unreachable; calls are admitted until the window ends.
    Grace,
    /// The license expired, was deactivated or does not exist.
    Expired,
    /// The license is bound to another machine.
    UnauthorizedHardware,
}

impl SessionMode {
    /// Terminal modes make no further server calls and never recover on
    /// their own.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::UnauthorizedHardware)
    }

    /// Modes in which calls may be admitted, subject to limits.
    #[must_use]
    pub fn admits_calls(self) -> bool {
        matches!(self, Self::Online | Self::Grace)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unvalidated => "unvalidated",
            Self::Online => "online",
            Self::Grace => "grace",
            Self::Expired => "expired",
            Self::UnauthorizedHardware => "unauthorized_hardware",
        };
        f.write_str(name)
    }
}

/// Why a session ended in a terminal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause", content = "reason")]
pub enum TerminalCause {
    /// The server refused the license.
    Rejected(RejectionReason),
    /// The server stayed unreachable for the whole grace window.
    GraceElapsed,
}

/// A mode change produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionMode,
    pub to: SessionMode,
}

/// Persisted validation state for one license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSession {
    pub license_key: LicenseKey,
    pub mode: SessionMode,
    /// Limits from the most recent confirmation.
    pub limits: Option<LicenseLimits>,
    #[serde(default)]
    pub warnings: Vec<LicenseWarning>,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    /// Set while in [`SessionMode::Grace`].
    pub grace_started_at: Option<DateTime<Utc>>,
    pub terminal_cause: Option<TerminalCause>,
}

impl ValidationSession {
    /// A fresh, unconfirmed session for `license_key`.
    #[must_use]
    pub fn new(license_key: LicenseKey) -> Self {
        Self {
            license_key,
            mode: SessionMode::Unvalidated,
            limits: None,
            warnings: Vec::new(),
            last_confirmed_at: None,
            grace_started_at: None,
            terminal_cause: None,
        }
    }

    /// Prepares a session loaded from disk for use in a new process.
    ///
    /// A cached `Online` session cannot prove the server is still reachable,
    /// so it resumes in `Grace` anchored at its last confirmation.
    #[must_use]
    pub fn restored(mut self) -> Self {
        if self.mode == SessionMode::Online {
            self.mode = SessionMode::Grace;
            self.grace_started_at = self.last_confirmed_at;
        }
        self
    }

    /// Instant at which a grace session becomes expired.
    #[must_use]
    pub fn grace_deadline(&self, window: Duration) -> Option<DateTime<Utc>> {
        match self.mode {
            SessionMode::Grace => self
                .grace_started_at
                .map(|start| start.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            _ => None,
        }
    }

    /// Applies a successful activation, revalidation or heartbeat.
    ///
    /// Ignored in terminal modes; leaving them requires a fresh key entry.
    pub fn apply_grant(&mut self, grant: AuthorizationGrant, now: DateTime<Utc>) -> Option<Transition> {
        if self.mode.is_terminal() {
            return None;
        }
        let from = self.mode;
        self.mode = SessionMode::Online;
        self.limits = Some(grant.limits);
        self.warnings = grant.warnings;
        self.last_confirmed_at = Some(now);
        self.grace_started_at = None;
        self.changed(from)
    }

    /// Applies an authoritative refusal from the server.
    pub fn apply_rejection(&mut self, reason: RejectionReason) -> Option<Transition> {
        if self.mode.is_terminal() {
            return None;
        }
        let from = self.mode;
        self.mode = match reason {
            RejectionReason::UnauthorizedHardware => SessionMode::UnauthorizedHardware,
            RejectionReason::NotFound | RejectionReason::Expired | RejectionReason::Deactivated => {
                SessionMode::Expired
            }
        };
        self.grace_started_at = None;
        self.terminal_cause = Some(TerminalCause::Rejected(reason));
        self.changed(from)
    }

    /// Applies a failed revalidation that did not reach a verdict.
    ///
    /// `Online` enters grace. `Grace` expires once the window has fully
    /// elapsed. `Unvalidated` stays put since nothing was ever confirmed.
    pub fn apply_transient_failure(&mut self, now: DateTime<Utc>, window: Duration) -> Option<Transition> {
        match self.mode {
            SessionMode::Online => {
                self.mode = SessionMode::Grace;
                self.grace_started_at = Some(now);
                self.changed(SessionMode::Online)
            }
            SessionMode::Grace => self.expire_if_grace_elapsed(now, window),
            _ => None,
        }
    }

    /// Moves a grace session to `Expired` once `now` reaches the deadline.
    pub fn expire_if_grace_elapsed(&mut self, now: DateTime<Utc>, window: Duration) -> Option<Transition> {
        let deadline = self.grace_deadline(window)?;
        if now < deadline {
            return None;
        }
        self.mode = SessionMode::Expired;
        self.terminal_cause = Some(TerminalCause::GraceElapsed);
        self.changed(SessionMode::Grace)
    }

    /// True if the cached limits say the license itself has run out.
    #[must_use]
    pub fn limits_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.limits.is_some_and(|limits| now >= limits.expires_at)
    }

    fn changed(&self, from: SessionMode) -> Option<Transition> {
        (from != self.mode).then_some(Transition { from, to: self.mode })
    }
}
