//! Cross-device progress reconciliation
//!
//! Pushes a minimal {level, xp, completed paths} snapshot to a remote
//! key-value store and applies remote snapshots locally with a
//! last-writer-wins max-merge: a field is only ever raised, never
//! regressed. Sync is best-effort: remote failures are logged and
//! swallowed, and the next throttled attempt retries from scratch.
//!
//! The local write lock is never held across a remote call: local state
//! is read, the remote is contacted, then local state is written as a
//! second independent transaction.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{progress, users, ProgressDb, UserRow};
use crate::error::StorageError;

/// Remote key the snapshot lives under
pub const SNAPSHOT_KEY: &str = "progress_snapshot";

/// Minimum interval between successful pushes, in minutes
const MIN_SYNC_INTERVAL_MINUTES: i64 = 5;

/// Snapshots older than this are discarded on retrieval
const SNAPSHOT_MAX_AGE_DAYS: i64 = 30;

/// Minimal key-value interface the remote store must provide
pub trait RemoteStore: Send + Sync {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn is_available(&self) -> bool;
}

/// The reconciled subset of user state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub level: i32,
    pub xp: i64,
    pub completed_paths: Vec<String>,
    pub synced_at: DateTime<Utc>,
}

/// One-way-max reconciliation bridge. Throttle state lives on the
/// instance and resets at process start.
pub struct SyncBridge<R: RemoteStore> {
    remote: R,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl<R: RemoteStore> SyncBridge<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            last_sync: Mutex::new(None),
        }
    }

    /// Push the user's progress to the remote store. Returns true when a
    /// snapshot was actually written; throttled calls, an unavailable
    /// remote, and remote failures all return false without touching
    /// local state.
    pub fn sync_progress(&self, user: &UserRow, completed_paths: &[String]) -> bool {
        self.sync_progress_at(user, completed_paths, Utc::now())
    }

    /// `sync_progress` with an explicit clock, for deterministic tests
    pub fn sync_progress_at(
        &self,
        user: &UserRow,
        completed_paths: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        if !self.remote.is_available() {
            debug!("Remote store unavailable, skipping sync");
            return false;
        }

        {
            let last = self.last_sync.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if now - at < Duration::minutes(MIN_SYNC_INTERVAL_MINUTES) {
                    debug!("Sync throttled (last at {})", at);
                    return false;
                }
            }
        }

        let snapshot = ProgressSnapshot {
            level: user.current_level,
            xp: user.total_xp,
            completed_paths: completed_paths.to_vec(),
            synced_at: now,
        };

        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to encode progress snapshot: {}", e);
                return false;
            }
        };

        match self.remote.set(SNAPSHOT_KEY, &bytes) {
            Ok(()) => {
                *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
                info!("Synced progress for {} (xp {}, level {})", user.id, user.total_xp, user.current_level);
                true
            }
            Err(e) => {
                warn!("Progress sync failed: {}", e);
                false
            }
        }
    }

    /// Fetch the remote snapshot. Stale or undecodable snapshots are
    /// removed from the remote and None returned.
    pub fn retrieve_synced_progress(&self) -> Option<ProgressSnapshot> {
        self.retrieve_synced_progress_at(Utc::now())
    }

    fn retrieve_synced_progress_at(&self, now: DateTime<Utc>) -> Option<ProgressSnapshot> {
        let bytes = match self.remote.get(SNAPSHOT_KEY) {
            Ok(Some(b)) => b,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read remote snapshot: {}", e);
                return None;
            }
        };

        let snapshot: ProgressSnapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!("Discarding undecodable remote snapshot: {}", e);
                self.discard_remote();
                return None;
            }
        };

        if now - snapshot.synced_at > Duration::days(SNAPSHOT_MAX_AGE_DAYS) {
            info!("Discarding stale remote snapshot from {}", snapshot.synced_at);
            self.discard_remote();
            return None;
        }

        Some(snapshot)
    }

    fn discard_remote(&self) {
        if let Err(e) = self.remote.remove(SNAPSHOT_KEY) {
            warn!("Failed to remove remote snapshot: {}", e);
        }
    }

    /// Apply the remote snapshot to local state when it is strictly
    /// ahead. Each field takes max(local, remote); remote completed
    /// paths are marked locally (idempotent). Returns true when local
    /// state changed.
    pub fn apply_synced_progress_if_needed(
        &self,
        db: &ProgressDb,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        // Read local state and release the lock before any remote call
        let local = db.with_conn(|conn| users::get_user(conn, user_id))?;
        let local = match local {
            Some(u) => u,
            None => return Ok(false),
        };

        let snapshot = match self.retrieve_synced_progress() {
            Some(s) => s,
            None => return Ok(false),
        };

        if snapshot.xp <= local.total_xp && snapshot.level <= local.current_level {
            debug!("Local progress is ahead, nothing to apply");
            return Ok(false);
        }

        let merged_xp = local.total_xp.max(snapshot.xp);
        let merged_level = local.current_level.max(snapshot.level);

        db.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

            tx.execute(
                "UPDATE users SET total_xp = ?, current_level = ?, updated_at = ? WHERE id = ?",
                rusqlite::params![
                    merged_xp,
                    merged_level,
                    crate::db::models::current_timestamp(),
                    user_id
                ],
            )
            .map_err(|e| StorageError::Internal(format!("Merge update failed: {}", e)))?;

            tx.commit()
                .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;
            Ok(())
        })?;

        db.with_conn_mut(|conn| {
            for path_id in &snapshot.completed_paths {
                progress::mark_path_completed(conn, user_id, path_id)?;
            }
            Ok(())
        })?;

        info!(
            "Applied remote progress for {}: xp {} -> {}, level {} -> {}",
            user_id, local.total_xp, merged_xp, local.current_level, merged_level
        );

        Ok(true)
    }
}
