//! Background revalidation and heartbeat loops.

use crate::error::ValidatorError;
use crate::validator::Validator;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Handles to the running background loops.
///
/// Dropping this also stops the loops, but skips the final cache write.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    validator: Validator,
}

impl BackgroundTasks {
    /// Spawns both loops on the current tokio runtime.
    ///
    /// Revalidation runs immediately and then every
    /// `revalidate_interval`; the first heartbeat waits one full
    /// `heartbeat_interval`.
    pub fn spawn(validator: Validator) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = validator.config().clone();

        let revalidation = tokio::spawn(run_loop(
            validator.clone(),
            shutdown_rx.clone(),
            Instant::now(),
            config.revalidate_interval,
            Task::Revalidate,
        ));
        let heartbeat = tokio::spawn(run_loop(
            validator.clone(),
            shutdown_rx,
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
            Task::Heartbeat,
        ));

        info!(
            revalidate_secs = config.revalidate_interval.as_secs(),
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            "License background tasks started"
        );

        Self {
            shutdown_tx,
            handles: vec![revalidation, heartbeat],
            validator,
        }
    }

    /// Stops both loops, abandoning any in-flight request, and writes the
    /// session cache.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "License background task ended abnormally");
            }
        }
        if let Err(e) = self.validator.flush() {
            warn!(error = %e, "Failed to write session cache on shutdown");
        }
        info!("License background tasks stopped");
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Revalidate,
    Heartbeat,
}

async fn run_loop(
    validator: Validator,
    mut shutdown_rx: watch::Receiver<bool>,
    start: Instant,
    period: Duration,
    task: Task,
) {
    let mut ticker = time::interval_at(start, period);
    // A tick missed while offline is not made up for; this keeps failures
    // from turning into a burst of retries.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        let outcome = tokio::select! {
            outcome = run_once(&validator, task) => outcome,
            _ = shutdown_rx.changed() => break,
        };

        match outcome {
            Ok(mode) => debug!(?task, %mode, "License check completed"),
            Err(ValidatorError::Transient(msg)) => {
                warn!(?task, error = %msg, "License server unreachable, retrying next interval");
            }
            Err(ValidatorError::Rejected(reason)) => {
                error!(?task, %reason, "License rejected by server");
            }
            Err(ValidatorError::NoLicenseKey) => debug!(?task, "No license key entered, skipping"),
            Err(e) => warn!(?task, error = %e, "License check failed"),
        }
    }
    debug!(?task, "License background task exiting");
}

async fn run_once(validator: &Validator, task: Task) -> Result<crate::SessionMode, ValidatorError> {
    match task {
        Task::Revalidate => validator.revalidate().await,
        Task::Heartbeat => validator.send_heartbeat().await,
    }
}
