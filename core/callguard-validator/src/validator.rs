//! The admission-control component embedded in the protected application.
//!
//! State shared between the call path and the background tasks lives behind
//! one mutex. Network calls are always made with the lock released; their
//! outcome is applied in a single short critical section, so a limit change
//! is visible to the very next admission check.

use crate::cache::SessionCache;
use crate::client::{HttpLicenseClient, LicenseClient};
use crate::config::ValidatorConfig;
use crate::error::{ClientError, ValidatorError, ValidatorResult};
use crate::resources::{HostResources, ResourceProbe};
use crate::session::{SessionMode, TerminalCause, Transition, ValidationSession};
use callguard_license::protocol::{AuthorizationGrant, HeartbeatRequest};
use callguard_license::{
    Clock, HardwareFingerprint, LicenseKey, LicenseLimits, RejectionReason, SystemClock,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct ValidatorState {
    session: Option<ValidationSession>,
    active_calls: u32,
    active_agents: u32,
    /// Calls admitted since the last accepted heartbeat.
    calls_since_report: u64,
    /// Set when the call path changed the session without writing the cache.
    unflushed: bool,
}

struct Shared {
    state: Mutex<ValidatorState>,
    /// Serializes cache writes so the file always reflects the latest state.
    persist_lock: Mutex<()>,
    client: Arc<dyn LicenseClient>,
    cache: SessionCache,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ResourceProbe>,
    fingerprint: HardwareFingerprint,
    config: ValidatorConfig,
}

/// Local license enforcement point.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Validator {
    shared: Arc<Shared>,
}

/// Builder for [`Validator`]; every part defaults to the real host.
pub struct ValidatorBuilder {
    config: ValidatorConfig,
    client: Option<Arc<dyn LicenseClient>>,
    clock: Option<Arc<dyn Clock>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    fingerprint: Option<HardwareFingerprint>,
}

impl ValidatorBuilder {
    /// Uses `client` instead of an HTTP client for `config.server_url`.
    pub fn client(mut self, client: Arc<dyn LicenseClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Uses a precomputed fingerprint instead of probing the host.
    pub fn fingerprint(mut self, fingerprint: HardwareFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Loads the cached session and builds the validator.
    ///
    /// No network call is made here; call [`Validator::revalidate`] or start
    /// the background tasks to contact the server.
    pub fn build(self) -> ValidatorResult<Validator> {
        let config = self.config;
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpLicenseClient::new(
                config.server_url.clone(),
                config.request_timeout,
            )?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let probe = self.probe.unwrap_or_else(|| Arc::new(HostResources));
        let fingerprint = self.fingerprint.unwrap_or_else(HardwareFingerprint::compute);

        if fingerprint.is_low_confidence() {
            warn!(
                fingerprint = %fingerprint,
                "Hardware fingerprint is low-confidence; fewer than two hardware sources were found"
            );
        }

        let cache = SessionCache::new(config.cache_path.clone(), &fingerprint);
        let cached = cache.load()?.map(ValidationSession::restored);

        let (session, fresh) = match (cached, config.license_key.clone()) {
            (Some(cached), Some(key)) if cached.license_key != key => {
                info!(license_key = %key.masked(), "Configured license key differs from cache, starting fresh");
                (Some(ValidationSession::new(key)), true)
            }
            (Some(cached), _) => {
                info!(
                    license_key = %cached.license_key.masked(),
                    mode = %cached.mode,
                    "Restored license session from cache"
                );
                (Some(cached), false)
            }
            (None, Some(key)) => (Some(ValidationSession::new(key)), true),
            (None, None) => (None, false),
        };

        let validator = Validator {
            shared: Arc::new(Shared {
                state: Mutex::new(ValidatorState {
                    session,
                    ..ValidatorState::default()
                }),
                persist_lock: Mutex::new(()),
                client,
                cache,
                clock,
                probe,
                fingerprint,
                config,
            }),
        };
        if fresh {
            validator.persist();
        }
        Ok(validator)
    }
}

impl Validator {
    /// Starts building a validator for `config`.
    pub fn builder(config: ValidatorConfig) -> ValidatorBuilder {
        ValidatorBuilder {
            config,
            client: None,
            clock: None,
            probe: None,
            fingerprint: None,
        }
    }

    /// Builds a validator for the real host.
    pub fn new(config: ValidatorConfig) -> ValidatorResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.shared.config
    }

    pub fn fingerprint(&self) -> &HardwareFingerprint {
        &self.shared.fingerprint
    }

    /// Current mode; `Unvalidated` when no key has been entered.
    pub fn mode(&self) -> SessionMode {
        self.lock()
            .session
            .as_ref()
            .map_or(SessionMode::Unvalidated, |s| s.mode)
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<ValidationSession> {
        self.lock().session.clone()
    }

    /// Limits from the last confirmation, if any.
    pub fn limits(&self) -> Option<LicenseLimits> {
        self.lock().session.as_ref().and_then(|s| s.limits)
    }

    /// Calls currently holding a [`CallPermit`].
    pub fn active_calls(&self) -> u32 {
        self.lock().active_calls
    }

    /// Updates the agent count reported with the next heartbeat.
    pub fn set_active_agents(&self, agents: u32) {
        self.lock().active_agents = agents;
    }

    /// Replaces the session with a fresh `Unvalidated` one for `key`.
    ///
    /// This is the only way out of a terminal mode.
    pub fn enter_license_key(&self, key: LicenseKey) {
        {
            let mut state = self.lock();
            if let Some(old) = &state.session {
                info!(
                    old_license_key = %old.license_key.masked(),
                    old_mode = %old.mode,
                    license_key = %key.masked(),
                    "License key entered, session reset"
                );
            }
            state.session = Some(ValidationSession::new(key));
            state.calls_since_report = 0;
        }
        self.persist();
    }

    /// Whether one more call may be admitted right now.
    ///
    /// Reads in-memory state only and touches neither the network nor the
    /// cache file. A grace expiry noticed here is written by the next server
    /// contact or by [`Validator::flush`].
    pub fn can_accept_call(&self) -> bool {
        let now = self.shared.clock.now();
        let mut state = self.lock();
        if self.expire_grace(&mut state, now).is_some() {
            state.unflushed = true;
        }
        admission_allowed(&state, now)
    }

    /// Atomically checks admission and reserves a call slot.
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_admit_call(&self) -> Option<CallPermit> {
        let now = self.shared.clock.now();
        let permit = {
            let mut state = self.lock();
            if self.expire_grace(&mut state, now).is_some() {
                state.unflushed = true;
            }
            admission_allowed(&state, now).then(|| {
                state.active_calls += 1;
                state.calls_since_report += 1;
                CallPermit {
                    shared: Arc::clone(&self.shared),
                }
            })
        };
        if permit.is_none() {
            debug!("Call admission denied");
        }
        permit
    }

    /// Activates or revalidates the license with the server.
    ///
    /// Transient failures move `Online` into grace and expire grace once the
    /// window has elapsed. Rejections are applied immediately. Terminal
    /// sessions make no network call.
    pub async fn revalidate(&self) -> ValidatorResult<SessionMode> {
        let key = self.contactable_key()?;
        let result = self
            .shared
            .client
            .activate(&key, self.shared.fingerprint.id())
            .await;
        self.apply_outcome(&key, result, true)
    }

    /// Sends a usage report; a successful response refreshes authorization.
    ///
    /// Transient failures are logged by the caller and leave the mode
    /// unchanged; the report is retried on the next tick with the pending
    /// call count intact.
    pub async fn send_heartbeat(&self) -> ValidatorResult<SessionMode> {
        let key = self.contactable_key()?;
        // Sampling runs `df` and opens a socket, so keep it off the runtime.
        let probe = Arc::clone(&self.shared.probe);
        let (resources, server_ip) =
            tokio::task::spawn_blocking(move || (probe.sample(), probe.local_ip()))
                .await
                .map_err(|e| ValidatorError::Transient(format!("resource sampling failed: {e}")))?;
        let (report, reported_calls) = {
            let state = self.lock();
            let report = HeartbeatRequest {
                hardware_fingerprint: self.shared.fingerprint.id().to_string(),
                active_calls: i64::from(state.active_calls),
                active_agents: i64::from(state.active_agents),
                calls_processed: i64::try_from(state.calls_since_report).unwrap_or(i64::MAX),
                server_ip,
                resources,
            };
            (report, state.calls_since_report)
        };

        let result = self.shared.client.heartbeat(&key, &report).await;
        if result.is_ok() {
            let mut state = self.lock();
            state.calls_since_report = state.calls_since_report.saturating_sub(reported_calls);
        }
        self.apply_outcome(&key, result, false)
    }

    /// Human-readable description of the current mode.
    pub fn status_message(&self) -> String {
        let state = self.lock();
        let Some(session) = state.session.as_ref() else {
            return "No license key entered. Enter a license key to activate this installation."
                .to_string();
        };
        match session.mode {
            SessionMode::Unvalidated => {
                "License not yet confirmed by the license server.".to_string()
            }
            SessionMode::Online => match session.limits {
                Some(limits) => format!(
                    "License active: up to {} concurrent calls and {} agents, valid until {}.",
                    limits.max_concurrent_calls,
                    limits.max_agents,
                    limits.expires_at.format("%Y-%m-%d")
                ),
                None => "License active.".to_string(),
            },
            SessionMode::Grace => {
                let deadline = session.grace_deadline(self.shared.config.grace_window_chrono());
                match deadline {
                    Some(deadline) => format!(
                        "License server unreachable. Operating offline until {}.",
                        deadline.format("%Y-%m-%d %H:%M UTC")
                    ),
                    None => "License server unreachable. Operating offline.".to_string(),
                }
            }
            SessionMode::Expired => match session.terminal_cause {
                Some(TerminalCause::Rejected(RejectionReason::Deactivated)) => {
                    "License has been deactivated. Contact your vendor.".to_string()
                }
                Some(TerminalCause::Rejected(RejectionReason::NotFound)) => {
                    "License key is not recognised by the license server.".to_string()
                }
                Some(TerminalCause::GraceElapsed) => {
                    "License could not be confirmed within the offline grace period.".to_string()
                }
                _ => "License has expired. Contact your vendor to renew.".to_string(),
            },
            SessionMode::UnauthorizedHardware => {
                "License is bound to a different machine. Ask your vendor to reset the hardware binding."
                    .to_string()
            }
        }
    }

    /// Writes the current session to the cache file.
    pub fn flush(&self) -> ValidatorResult<()> {
        let _guard = self
            .shared
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let session = {
            let mut state = self.lock();
            state.unflushed = false;
            state.session.clone()
        };
        match session {
            Some(session) => self.shared.cache.save(&session),
            None => Ok(()),
        }
    }

    fn persist(&self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.shared.cache.path().display(), "Failed to write session cache");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ValidatorState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key to contact the server with, unless the session forbids it.
    ///
    /// Also writes any session change the call path left unflushed.
    fn contactable_key(&self) -> ValidatorResult<LicenseKey> {
        let now = self.shared.clock.now();
        let (result, pending) = {
            let mut state = self.lock();
            let transition = self.expire_grace(&mut state, now);
            let result = match state.session.as_ref() {
                None => Err(ValidatorError::NoLicenseKey),
                Some(session) if session.mode.is_terminal() => Err(terminal_error(session)),
                Some(session) => Ok(session.license_key.clone()),
            };
            (result, transition.is_some() || state.unflushed)
        };
        if pending {
            self.persist();
        }
        result
    }

    fn expire_grace(&self, state: &mut ValidatorState, now: DateTime<Utc>) -> Option<Transition> {
        let window = self.shared.config.grace_window_chrono();
        let session = state.session.as_mut()?;
        let transition = session.expire_if_grace_elapsed(now, window)?;
        log_transition(&session.license_key, transition);
        Some(transition)
    }

    /// Applies a server outcome to the session for `key`.
    ///
    /// Outcomes for a key that was replaced while the request was in flight
    /// are dropped.
    fn apply_outcome(
        &self,
        key: &LicenseKey,
        result: Result<AuthorizationGrant, ClientError>,
        enters_grace: bool,
    ) -> ValidatorResult<SessionMode> {
        let now = self.shared.clock.now();
        let window = self.shared.config.grace_window_chrono();
        let (mode, transition) = {
            let mut state = self.lock();
            let Some(session) = state.session.as_mut().filter(|s| &s.license_key == key) else {
                debug!(license_key = %key.masked(), "Discarding response for replaced license key");
                return Err(ValidatorError::KeyReplaced);
            };
            let transition = match &result {
                Ok(grant) => session.apply_grant(grant.clone(), now),
                Err(ClientError::Rejected(reason)) => session.apply_rejection(*reason),
                Err(ClientError::Transient(_)) if enters_grace => {
                    session.apply_transient_failure(now, window)
                }
                Err(ClientError::Transient(_)) => session.expire_if_grace_elapsed(now, window),
            };
            if let Some(t) = transition {
                log_transition(key, t);
            }
            (session.mode, transition)
        };

        // Every successful contact refreshes limits, so persist even without a
        // mode change.
        if transition.is_some() || result.is_ok() {
            self.persist();
        }

        match result {
            Ok(_) => Ok(mode),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reservation of one concurrent-call slot.
///
/// Dropping the permit ends the call. Permits outlive terminal transitions,
/// so calls already in progress drain normally.
pub struct CallPermit {
    shared: Arc<Shared>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active_calls = state.active_calls.saturating_sub(1);
    }
}

impl std::fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit").finish_non_exhaustive()
    }
}

fn admission_allowed(state: &ValidatorState, now: DateTime<Utc>) -> bool {
    let Some(session) = state.session.as_ref() else {
        return false;
    };
    if !session.mode.admits_calls() || session.limits_expired_at(now) {
        return false;
    }
    session
        .limits
        .is_some_and(|limits| state.active_calls < limits.max_concurrent_calls)
}

fn terminal_error(session: &ValidationSession) -> ValidatorError {
    match session.terminal_cause {
        Some(TerminalCause::Rejected(reason)) => ValidatorError::Rejected(reason),
        Some(TerminalCause::GraceElapsed) | None => match session.mode {
            SessionMode::UnauthorizedHardware => {
                ValidatorError::Rejected(RejectionReason::UnauthorizedHardware)
            }
            _ => ValidatorError::Rejected(RejectionReason::Expired),
        },
    }
}

fn log_transition(key: &LicenseKey, t: Transition) {
    let key = key.masked();
    match t.to {
        SessionMode::Online => info!(license_key = %key, from = %t.from, "License confirmed, validator online"),
        SessionMode::Grace => {
            warn!(license_key = %key, from = %t.from, "License server unreachable, entering grace period");
        }
        SessionMode::Expired | SessionMode::UnauthorizedHardware => {
            error!(license_key = %key, from = %t.from, to = %t.to, "License validation ended, refusing new calls");
        }
        SessionMode::Unvalidated => info!(license_key = %key, from = %t.from, "License session reset"),
    }
}
