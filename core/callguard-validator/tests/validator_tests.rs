//! Tests for admission control and server outcome handling.

mod common;

use async_trait::async_trait;
use callguard_license::protocol::{AuthorizationGrant, HeartbeatRequest};
use callguard_license::{LicenseKey, LicenseWarning, RejectionReason};
use callguard_validator::{
    ClientError, LicenseClient, SessionCache, SessionMode, Validator, ValidatorConfig,
    ValidatorError,
};
use chrono::Duration;
use common::{
    config_in, fingerprint, grant, grant_with_warnings, key, other_key, rejected, transient,
    validator_in, ScriptedClient,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Holds every activation until the test releases it.
#[derive(Default)]
struct GatedClient {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl LicenseClient for GatedClient {
    async fn activate(&self, _: &LicenseKey, _: &str) -> Result<AuthorizationGrant, ClientError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(grant(5))
    }

    async fn heartbeat(
        &self,
        _: &LicenseKey,
        _: &HeartbeatRequest,
    ) -> Result<AuthorizationGrant, ClientError> {
        Err(ClientError::Transient("not scripted".to_string()))
    }
}

#[tokio::test]
async fn unvalidated_validator_denies_calls() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    let (validator, _clock) = validator_in(dir.path(), client);

    assert_eq!(validator.mode(), SessionMode::Unvalidated);
    assert!(!validator.can_accept_call());
    assert!(validator.try_admit_call().is_none());
}

#[tokio::test]
async fn activation_success_goes_online() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client.clone());

    let mode = validator.revalidate().await.unwrap();
    assert_eq!(mode, SessionMode::Online);
    assert_eq!(validator.limits().map(|l| l.max_concurrent_calls), Some(5));
    assert!(validator.can_accept_call());
    assert_eq!(client.activation_calls(), 1);
}

#[tokio::test]
async fn sixth_call_waits_for_a_free_slot() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let mut permits: Vec<_> = (0..5)
        .map(|_| validator.try_admit_call().expect("slot available"))
        .collect();
    assert_eq!(validator.active_calls(), 5);
    assert!(!validator.can_accept_call());
    assert!(validator.try_admit_call().is_none());

    permits.pop();
    assert_eq!(validator.active_calls(), 4);
    assert!(validator.can_accept_call());
    let sixth = validator.try_admit_call();
    assert!(sixth.is_some());
    assert_eq!(validator.active_calls(), 5);
}

#[tokio::test]
async fn limit_change_is_visible_to_next_admission_check() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(2)));
    client.push_activation(Ok(grant(1)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let _first = validator.try_admit_call().unwrap();
    assert!(validator.can_accept_call());

    validator.revalidate().await.unwrap();
    assert!(!validator.can_accept_call());
}

#[tokio::test]
async fn activation_rejection_is_terminal() {
    for (reason, mode) in [
        (RejectionReason::Expired, SessionMode::Expired),
        (RejectionReason::Deactivated, SessionMode::Expired),
        (RejectionReason::NotFound, SessionMode::Expired),
        (RejectionReason::UnauthorizedHardware, SessionMode::UnauthorizedHardware),
    ] {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new();
        client.push_activation(rejected(reason));
        let (validator, _clock) = validator_in(dir.path(), client.clone());

        let err = validator.revalidate().await.unwrap_err();
        assert!(matches!(err, ValidatorError::Rejected(r) if r == reason));
        assert_eq!(validator.mode(), mode);
        assert!(!validator.can_accept_call());

        // Terminal sessions make no further network calls.
        let err = validator.revalidate().await.unwrap_err();
        assert!(matches!(err, ValidatorError::Rejected(_)));
        assert_eq!(client.activation_calls(), 1);
    }
}

#[tokio::test]
async fn transient_failure_while_unvalidated_does_not_admit() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(transient());
    let (validator, _clock) = validator_in(dir.path(), client);

    let err = validator.revalidate().await.unwrap_err();
    assert!(matches!(err, ValidatorError::Transient(_)));
    assert_eq!(validator.mode(), SessionMode::Unvalidated);
    assert!(!validator.can_accept_call());
}

#[tokio::test]
async fn offline_operation_is_bounded_by_grace_window() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    // Server goes away; every scripted response from here on is transient.
    clock.advance(Duration::hours(1));
    assert!(validator.revalidate().await.is_err());
    assert_eq!(validator.mode(), SessionMode::Grace);
    assert!(validator.can_accept_call());

    for _ in 0..23 {
        clock.advance(Duration::hours(1));
        let _ = validator.revalidate().await;
        assert_eq!(validator.mode(), SessionMode::Grace);
    }

    // 23 hours and 59 minutes after the first failure: still admitting.
    clock.advance(Duration::minutes(59));
    assert!(validator.can_accept_call());

    // The admission path itself enforces the deadline, even between
    // revalidation ticks.
    clock.advance(Duration::minutes(1));
    assert!(!validator.can_accept_call());
    assert_eq!(validator.mode(), SessionMode::Expired);
}

#[tokio::test]
async fn rejection_during_grace_is_applied_immediately() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    client.push_activation(transient());
    client.push_activation(rejected(RejectionReason::Deactivated));
    let (validator, clock) = validator_in(dir.path(), client);

    validator.revalidate().await.unwrap();
    clock.advance(Duration::hours(1));
    let _ = validator.revalidate().await;
    assert_eq!(validator.mode(), SessionMode::Grace);

    clock.advance(Duration::hours(1));
    let _ = validator.revalidate().await;
    assert_eq!(validator.mode(), SessionMode::Expired);
}

#[tokio::test]
async fn deactivation_reaches_running_client_via_heartbeat() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    client.push_heartbeat(rejected(RejectionReason::Deactivated));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let in_progress = validator.try_admit_call().unwrap();

    let err = validator.send_heartbeat().await.unwrap_err();
    assert!(matches!(err, ValidatorError::Rejected(RejectionReason::Deactivated)));
    assert_eq!(validator.mode(), SessionMode::Expired);
    assert!(!validator.can_accept_call());

    // Calls already accepted drain normally.
    assert_eq!(validator.active_calls(), 1);
    drop(in_progress);
    assert_eq!(validator.active_calls(), 0);
    assert!(!validator.can_accept_call());
}

#[tokio::test]
async fn heartbeat_success_recovers_from_grace() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    client.push_activation(transient());
    client.push_heartbeat(Ok(grant_with_warnings(7, vec![LicenseWarning::ExpiringSoon])));
    let (validator, clock) = validator_in(dir.path(), client);

    validator.revalidate().await.unwrap();
    clock.advance(Duration::hours(1));
    let _ = validator.revalidate().await;
    assert_eq!(validator.mode(), SessionMode::Grace);

    assert_eq!(validator.send_heartbeat().await.unwrap(), SessionMode::Online);
    let session = validator.session().unwrap();
    assert_eq!(session.limits.map(|l| l.max_concurrent_calls), Some(7));
    assert_eq!(session.warnings, vec![LicenseWarning::ExpiringSoon]);
}

#[tokio::test]
async fn transient_heartbeat_failure_leaves_mode_unchanged() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let err = validator.send_heartbeat().await.unwrap_err();
    assert!(matches!(err, ValidatorError::Transient(_)));
    assert_eq!(validator.mode(), SessionMode::Online);
}

#[tokio::test]
async fn heartbeat_reports_usage_and_keeps_unreported_calls() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    client.push_heartbeat(transient());
    client.push_heartbeat(Ok(grant(5)));
    client.push_heartbeat(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client.clone());
    validator.revalidate().await.unwrap();
    validator.set_active_agents(3);

    drop(validator.try_admit_call().unwrap());
    drop(validator.try_admit_call().unwrap());
    let live = validator.try_admit_call().unwrap();

    // First report fails, so the next one still carries all three calls.
    assert!(validator.send_heartbeat().await.is_err());
    validator.send_heartbeat().await.unwrap();
    validator.send_heartbeat().await.unwrap();
    drop(live);

    let reports = client.reports();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].calls_processed, 3);
    assert_eq!(reports[1].calls_processed, 3);
    assert_eq!(reports[2].calls_processed, 0);

    let last = &reports[1];
    assert_eq!(last.active_calls, 1);
    assert_eq!(last.active_agents, 3);
    assert_eq!(last.server_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(last.resources.cpu, 12.5);
    assert_eq!(last.hardware_fingerprint, common::fingerprint().id());
}

#[tokio::test]
async fn cached_limits_past_expiry_deny_admission() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    clock.advance(Duration::days(30));
    assert!(!validator.can_accept_call());
}

#[tokio::test]
async fn entering_a_new_key_leaves_terminal_state() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(rejected(RejectionReason::UnauthorizedHardware));
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);

    let _ = validator.revalidate().await;
    assert_eq!(validator.mode(), SessionMode::UnauthorizedHardware);

    validator.enter_license_key(other_key());
    assert_eq!(validator.mode(), SessionMode::Unvalidated);
    assert_eq!(validator.session().unwrap().license_key, other_key());

    validator.revalidate().await.unwrap();
    assert_eq!(validator.mode(), SessionMode::Online);
}

#[tokio::test]
async fn status_message_differs_per_terminal_state() {
    let mut messages = Vec::new();
    for reason in [
        RejectionReason::Expired,
        RejectionReason::Deactivated,
        RejectionReason::UnauthorizedHardware,
    ] {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new();
        client.push_activation(rejected(reason));
        let (validator, _clock) = validator_in(dir.path(), client);
        let _ = validator.revalidate().await;
        messages.push(validator.status_message());
    }
    messages.dedup();
    assert_eq!(messages.len(), 3);
    assert!(messages[2].contains("different machine"));
}

#[tokio::test]
async fn status_message_reports_limits_when_online() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let message = validator.status_message();
    assert!(message.contains("5 concurrent calls"), "{message}");
    assert!(message.contains("2026-03-31"), "{message}");
}

#[tokio::test]
async fn session_survives_restart_in_grace() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();
    drop(validator);

    let (restarted, clock) = validator_in(dir.path(), ScriptedClient::new());
    assert_eq!(restarted.mode(), SessionMode::Grace);
    assert_eq!(restarted.session().unwrap().license_key, key());
    assert!(restarted.can_accept_call());

    // The grace window counts from the last confirmation before restart.
    clock.advance(Duration::hours(24));
    assert!(!restarted.can_accept_call());
}

#[tokio::test]
async fn terminal_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(rejected(RejectionReason::Expired));
    let (validator, _clock) = validator_in(dir.path(), client);
    let _ = validator.revalidate().await;
    drop(validator);

    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (restarted, _clock) = validator_in(dir.path(), client.clone());
    assert_eq!(restarted.mode(), SessionMode::Expired);
    assert!(restarted.revalidate().await.is_err());
    assert_eq!(client.activation_calls(), 0);
}

#[tokio::test]
async fn admission_never_exceeds_limit_under_contention() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(10)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let validator = validator.clone();
            std::thread::spawn(move || validator.try_admit_call())
        })
        .collect();
    let permits: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(permits.len(), 10);
    assert_eq!(validator.active_calls(), 10);
    drop(permits);
    assert_eq!(validator.active_calls(), 0);
}

#[tokio::test]
async fn configured_key_differing_from_cache_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, _clock) = validator_in(dir.path(), client);
    validator.revalidate().await.unwrap();
    drop(validator);

    let restarted = Validator::builder(ValidatorConfig {
        license_key: Some(other_key()),
        ..config_in(dir.path())
    })
    .client(ScriptedClient::new())
    .fingerprint(fingerprint())
    .build()
    .unwrap();

    assert_eq!(restarted.mode(), SessionMode::Unvalidated);
    assert_eq!(restarted.session().unwrap().license_key, other_key());
    assert_eq!(restarted.limits(), None);
    assert!(!restarted.can_accept_call());

    let cached = SessionCache::new(dir.path().join("session.json"), &fingerprint())
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(cached.license_key, other_key());
}

#[tokio::test]
async fn response_for_replaced_key_is_discarded() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(GatedClient::default());
    let validator = Validator::builder(config_in(dir.path()))
        .client(client.clone())
        .fingerprint(fingerprint())
        .build()
        .unwrap();

    let in_flight = tokio::spawn({
        let validator = validator.clone();
        async move { validator.revalidate().await }
    });
    client.started.notified().await;
    validator.enter_license_key(other_key());
    client.release.notify_one();

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(ValidatorError::KeyReplaced)), "{result:?}");
    let session = validator.session().unwrap();
    assert_eq!(session.license_key, other_key());
    assert_eq!(session.mode, SessionMode::Unvalidated);
    assert_eq!(session.limits, None);
    assert!(!validator.can_accept_call());
}

#[tokio::test]
async fn grace_expiry_on_call_path_is_written_by_next_contact() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();
    client.push_activation(Ok(grant(5)));
    let (validator, clock) = validator_in(dir.path(), client.clone());
    validator.revalidate().await.unwrap();
    clock.advance(Duration::hours(1));
    let _ = validator.revalidate().await;
    assert_eq!(validator.mode(), SessionMode::Grace);

    let cache = SessionCache::new(dir.path().join("session.json"), &fingerprint());
    clock.advance(Duration::hours(24));
    assert!(!validator.can_accept_call());
    assert_eq!(validator.mode(), SessionMode::Expired);
    assert_eq!(cache.load().unwrap().unwrap().mode, SessionMode::Grace);

    let calls_before = client.activation_calls();
    assert!(matches!(
        validator.revalidate().await,
        Err(ValidatorError::Rejected(RejectionReason::Expired))
    ));
    assert_eq!(client.activation_calls(), calls_before);
    assert_eq!(cache.load().unwrap().unwrap().mode, SessionMode::Expired);
}
