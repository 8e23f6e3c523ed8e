//! SQLite persistence for license records.
//!
//! Every mutation runs inside an immediate transaction while holding the
//! connection mutex, so the read-modify-write of a single record (binding
//! check, heartbeat counter increment) can never interleave with another
//! writer. Records are never deleted; lifecycle changes are appended to the
//! `license_events` audit table.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    HeartbeatSnapshot, License, LicenseEvent, LicenseEventKind, LicenseFilter, LicenseState,
    LicenseStats, NewLicense,
};
use callguard_license::protocol::ResourceUsage;
use callguard_license::{Clock, LicenseKey};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// How many fresh keys `create` tries before giving up.
pub const MAX_KEY_ATTEMPTS: u32 = 8;

const LICENSE_COLUMNS: &str = "license_key, client_name, client_email, max_concurrent_calls, \
     max_agents, issued_at, expires_at, is_trial, active, hardware_fingerprint, activated_at, \
     total_calls_processed, last_heartbeat_at, last_seen_ip, last_active_calls, \
     last_active_agents, last_cpu, last_ram, last_disk";

/// Durable store of license records backed by SQLite.
pub struct LicenseStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl LicenseStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn, clock)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    /// Wraps `conn` and creates the schema if missing.
    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates the license and audit tables.
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS licenses (
                license_key TEXT PRIMARY KEY,
                client_name TEXT NOT NULL,
                client_email TEXT NOT NULL,
                max_concurrent_calls INTEGER NOT NULL,
                max_agents INTEGER NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                is_trial INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                hardware_fingerprint TEXT,
                activated_at TEXT,
                total_calls_processed INTEGER NOT NULL DEFAULT 0,
                last_heartbeat_at TEXT,
                last_seen_ip TEXT,
                last_active_calls INTEGER NOT NULL DEFAULT 0,
                last_active_agents INTEGER NOT NULL DEFAULT 0,
                last_cpu REAL,
                last_ram REAL,
                last_disk REAL
            );

            CREATE TABLE IF NOT EXISTS license_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                license_key TEXT NOT NULL REFERENCES licenses(license_key),
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_license_events_key
                ON license_events(license_key);
            ",
        )?;
        Ok(())
    }

    /// Locks the connection, mapping poisoning to [`StoreError::LockPoisoned`].
    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Returns the store's notion of the current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Issuance ─────────────────────────────────────────────────

    /// Issues a new license under a freshly generated key.
    ///
    /// Key collisions are retried internally; [`StoreError::DuplicateKey`]
    /// only surfaces if [`MAX_KEY_ATTEMPTS`] keys in a row collide.
    pub fn create(&self, spec: &NewLicense) -> StoreResult<License> {
        self.create_with_key_source(spec, LicenseKey::generate)
    }

    /// Issues a new license taking candidate keys from `next_key`.
    pub fn create_with_key_source(
        &self,
        spec: &NewLicense,
        mut next_key: impl FnMut() -> LicenseKey,
    ) -> StoreResult<License> {
        let now = self.clock.now();
        let expires_at = now + Duration::days(i64::from(spec.validity_days));

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let key = next_key();
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT INTO licenses (license_key, client_name, client_email, max_concurrent_calls, \
                 max_agents, issued_at, expires_at, is_trial, active) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
                params![
                    key.as_str(),
                    spec.client_name,
                    spec.client_email,
                    spec.max_concurrent_calls,
                    spec.max_agents,
                    now,
                    expires_at,
                    spec.is_trial,
                ],
            );

            match inserted {
                Ok(_) => {
                    append_event(
                        &tx,
                        &key,
                        LicenseEventKind::Created,
                        &format!("valid for {} days", spec.validity_days),
                        now,
                    )?;
                    let license = fetch(&tx, &key)?;
                    tx.commit()?;
                    info!(
                        license_key = %key.masked(),
                        client = %spec.client_name,
                        trial = spec.is_trial,
                        "license issued"
                    );
                    return Ok(license);
                }
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    warn!(attempt, "generated license key collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::DuplicateKey(MAX_KEY_ATTEMPTS))
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Fetches a license by key.
    pub fn get(&self, key: &LicenseKey) -> StoreResult<License> {
        let conn = self.lock()?;
        fetch(&conn, key)
    }

    /// Lists licenses matching `filter`, oldest first.
    pub fn list(&self, filter: LicenseFilter) -> StoreResult<Vec<License>> {
        let now = self.clock.now();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses ORDER BY issued_at ASC, license_key ASC"
        ))?;
        let licenses = stmt
            .query_map([], row_to_license)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(licenses
            .into_iter()
            .filter(|l| filter.matches(l, now))
            .collect())
    }

    /// Computes aggregate statistics over all licenses.
    pub fn stats(&self) -> StoreResult<LicenseStats> {
        let now = self.clock.now();
        let mut stats = LicenseStats::default();
        for license in self.list(LicenseFilter::All)? {
            stats.total += 1;
            match license.state_at(now) {
                LicenseState::Active => stats.active += 1,
                LicenseState::Expired => stats.expired += 1,
                LicenseState::Deactivated => stats.deactivated += 1,
            }
            if license.is_trial {
                stats.trial += 1;
            }
            if license.hardware_fingerprint.is_some() {
                stats.bound += 1;
            }
            stats.total_calls_processed += license.total_calls_processed;
        }
        Ok(stats)
    }

    /// Returns the audit trail of a license, oldest first.
    pub fn history(&self, key: &LicenseKey) -> StoreResult<Vec<LicenseEvent>> {
        let conn = self.lock()?;
        fetch(&conn, key)?;
        let mut stmt = conn.prepare(
            "SELECT kind, detail, at FROM license_events WHERE license_key = ?1 ORDER BY id ASC",
        )?;
        let events = stmt
            .query_map(params![key.as_str()], |row| {
                let kind: String = row.get(0)?;
                let kind = kind.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
                })?;
                Ok(LicenseEvent {
                    kind,
                    detail: row.get(1)?,
                    at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // ── Validator-driven mutations ───────────────────────────────

    /// Binds the license to `fingerprint`.
    ///
    /// Succeeds if the license is unbound or already bound to the same
    /// fingerprint; fails with [`StoreError::HardwareMismatch`] otherwise.
    pub fn bind_hardware(&self, key: &LicenseKey, fingerprint: &str) -> StoreResult<License> {
        let now = self.clock.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = fetch(&tx, key)?;

        match current.hardware_fingerprint.as_deref() {
            Some(bound) if bound == fingerprint => {
                debug!(license_key = %key.masked(), "hardware already bound");
                Ok(current)
            }
            Some(_) => {
                warn!(license_key = %key.masked(), "activation from different hardware refused");
                Err(StoreError::HardwareMismatch {
                    key: key.masked(),
                })
            }
            None => {
                tx.execute(
                    "UPDATE licenses SET hardware_fingerprint = ?1, activated_at = ?2 \
                     WHERE license_key = ?3",
                    params![fingerprint, now, key.as_str()],
                )?;
                append_event(&tx, key, LicenseEventKind::HardwareBound, fingerprint, now)?;
                let license = fetch(&tx, key)?;
                tx.commit()?;
                info!(license_key = %key.masked(), "license bound to hardware");
                Ok(license)
            }
        }
    }

    /// Records a usage report, adding `calls_processed` to the cumulative
    /// counter and replacing the last-seen values.
    pub fn record_heartbeat(
        &self,
        key: &LicenseKey,
        snapshot: &HeartbeatSnapshot,
    ) -> StoreResult<License> {
        let now = self.clock.now();
        let calls = i64::try_from(snapshot.calls_processed)
            .map_err(|_| StoreError::InvalidData("calls_processed out of range".to_string()))?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx.execute(
            "UPDATE licenses SET \
                total_calls_processed = total_calls_processed + ?1, \
                last_heartbeat_at = ?2, \
                last_seen_ip = COALESCE(?3, last_seen_ip), \
                last_active_calls = ?4, \
                last_active_agents = ?5, \
                last_cpu = ?6, last_ram = ?7, last_disk = ?8 \
             WHERE license_key = ?9",
            params![
                calls,
                now,
                snapshot.source_ip,
                snapshot.active_calls,
                snapshot.active_agents,
                f64::from(snapshot.resources.cpu),
                f64::from(snapshot.resources.ram),
                f64::from(snapshot.resources.disk),
                key.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(key.masked()));
        }
        let license = fetch(&tx, key)?;
        tx.commit()?;
        debug!(
            license_key = %key.masked(),
            active_calls = snapshot.active_calls,
            total_calls = license.total_calls_processed,
            "heartbeat recorded"
        );
        Ok(license)
    }

    // ── Operator lifecycle ───────────────────────────────────────

    /// Pushes the expiration `days` forward from the later of the current
    /// expiration and now, so extending a lapsed license yields a usable one.
    pub fn extend(&self, key: &LicenseKey, days: u32) -> StoreResult<License> {
        let now = self.clock.now();
        self.mutate(key, LicenseEventKind::Extended, |tx, current| {
            let base = current.expires_at.max(now);
            let new_expiry = base + Duration::days(i64::from(days));
            tx.execute(
                "UPDATE licenses SET expires_at = ?1 WHERE license_key = ?2",
                params![new_expiry, key.as_str()],
            )?;
            Ok(format!("+{days} days, now expires {}", new_expiry.to_rfc3339()))
        })
    }

    /// Marks the license inactive. Idempotent.
    pub fn deactivate(&self, key: &LicenseKey) -> StoreResult<License> {
        self.set_active(key, false)
    }

    /// Marks the license active again. Idempotent.
    pub fn reactivate(&self, key: &LicenseKey) -> StoreResult<License> {
        self.set_active(key, true)
    }

    /// Clears the hardware binding so the next activation may bind anew.
    pub fn reset_binding(&self, key: &LicenseKey) -> StoreResult<License> {
        self.mutate(key, LicenseEventKind::BindingReset, |tx, current| {
            tx.execute(
                "UPDATE licenses SET hardware_fingerprint = NULL, activated_at = NULL \
                 WHERE license_key = ?1",
                params![key.as_str()],
            )?;
            Ok(format!(
                "previously bound to {}",
                current.hardware_fingerprint.as_deref().unwrap_or("nothing")
            ))
        })
    }

    /// Sets the `active` flag and records the matching event.
    fn set_active(&self, key: &LicenseKey, active: bool) -> StoreResult<License> {
        let kind = if active {
            LicenseEventKind::Reactivated
        } else {
            LicenseEventKind::Deactivated
        };
        self.mutate(key, kind, |tx, _| {
            tx.execute(
                "UPDATE licenses SET active = ?1 WHERE license_key = ?2",
                params![active, key.as_str()],
            )?;
            Ok(String::new())
        })
    }

    /// Runs `apply` against the current record inside one transaction and
    /// appends an audit event with the detail it returns.
    fn mutate<F>(&self, key: &LicenseKey, kind: LicenseEventKind, apply: F) -> StoreResult<License>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, &License) -> StoreResult<String>,
    {
        let now = self.clock.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = fetch(&tx, key)?;
        let detail = apply(&tx, &current)?;
        append_event(&tx, key, kind, &detail, now)?;
        let license = fetch(&tx, key)?;
        tx.commit()?;
        info!(license_key = %key.masked(), event = %kind, "license updated");
        Ok(license)
    }
}

/// Loads one license row by key.
fn fetch(conn: &Connection, key: &LicenseKey) -> StoreResult<License> {
    conn.query_row(
        &format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE license_key = ?1"),
        params![key.as_str()],
        row_to_license,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(key.masked()))
}

/// Appends an entry to the audit trail.
fn append_event(
    conn: &Connection,
    key: &LicenseKey,
    kind: LicenseEventKind,
    detail: &str,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO license_events (license_key, kind, detail, at) VALUES (?1, ?2, ?3, ?4)",
        params![key.as_str(), kind.as_str(), detail, at],
    )?;
    Ok(())
}

/// Maps a `LICENSE_COLUMNS` row to a [`License`].
fn row_to_license(row: &Row<'_>) -> rusqlite::Result<License> {
    let key: String = row.get(0)?;
    let key = LicenseKey::parse(&key)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let total_calls: i64 = row.get(11)?;
    let cpu: Option<f64> = row.get(16)?;
    let ram: Option<f64> = row.get(17)?;
    let disk: Option<f64> = row.get(18)?;
    let last_resources = match (cpu, ram, disk) {
        (Some(cpu), Some(ram), Some(disk)) => Some(ResourceUsage {
            cpu: cpu as f32,
            ram: ram as f32,
            disk: disk as f32,
        }),
        _ => None,
    };

    Ok(License {
        key,
        client_name: row.get(1)?,
        client_email: row.get(2)?,
        max_concurrent_calls: row.get(3)?,
        max_agents: row.get(4)?,
        issued_at: row.get(5)?,
        expires_at: row.get(6)?,
        is_trial: row.get(7)?,
        active: row.get(8)?,
        hardware_fingerprint: row.get(9)?,
        activated_at: row.get(10)?,
        total_calls_processed: u64::try_from(total_calls).unwrap_or_default(),
        last_heartbeat_at: row.get(12)?,
        last_seen_ip: row.get(13)?,
        last_active_calls: row.get(14)?,
        last_active_agents: row.get(15)?,
        last_resources,
    })
}
