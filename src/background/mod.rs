// src/background/mod.rs
// Retention enforcer: scheduled sweep of expired rows and sessions
//
// One sweep deletes primary-store rows older than the retention window,
// drops expired session index entries, and reports what it freed. The
// worker runs a sweep immediately on start, then on every interval tick.
// A failed sweep is logged and the loop continues; sweeps are idempotent,
// so the next interval simply picks up whatever newly expired.

use crate::cache::SessionCache;
use crate::config::RetentionConfig;
use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::utils::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Accounting for one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows deleted from the primary store
    pub deleted: usize,
    /// Expired session index entries dropped from the cache
    pub sessions_removed: usize,
    /// Store size delta (before - after); non-positive when pages are
    /// merely marked free
    pub freed_bytes: i64,
    pub duration_millis: u64,
    pub timestamp: i64,
}

/// Periodic retention enforcement over the primary store and session cache.
pub struct RetentionEnforcer {
    db: Arc<DatabasePool>,
    cache: Arc<SessionCache>,
    policy: watch::Sender<RetentionConfig>,
}

impl RetentionEnforcer {
    pub fn new(db: Arc<DatabasePool>, cache: Arc<SessionCache>, policy: RetentionConfig) -> Self {
        let (policy_tx, _) = watch::channel(policy);
        Self {
            db,
            cache,
            policy: policy_tx,
        }
    }

    /// Current policy.
    pub fn policy(&self) -> RetentionConfig {
        *self.policy.borrow()
    }

    /// Replace the policy. The worker observes the change immediately:
    /// flipping `enabled` cancels or restarts the timer, an interval
    /// change resets it.
    pub fn update_policy(&self, policy: RetentionConfig) {
        let _ = self.policy.send(policy);
    }

    /// Run one sweep now, regardless of the schedule.
    pub async fn enforce_retention_policy(&self) -> Result<SweepReport> {
        let started = std::time::Instant::now();
        let policy = self.policy();
        let cutoff = policy.cutoff_millis(now_millis());

        let before = self.db.interact(db::get_stats_sync).await?;
        let deleted = self
            .db
            .interact(move |conn| db::cleanup_old_entries_sync(conn, cutoff))
            .await?;

        // Cache loss never fails a sweep; the next one retries.
        let sessions_removed = match self.cache.cleanup_expired_sessions().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("session cache sweep skipped: {}", e);
                0
            }
        };

        let after = self.db.interact(db::get_stats_sync).await?;

        let report = SweepReport {
            deleted,
            sessions_removed,
            freed_bytes: before.storage_bytes - after.storage_bytes,
            duration_millis: started.elapsed().as_millis() as u64,
            timestamp: now_millis(),
        };
        tracing::info!(
            deleted = report.deleted,
            sessions_removed = report.sessions_removed,
            freed_bytes = report.freed_bytes,
            duration_millis = report.duration_millis,
            "[retention] sweep complete"
        );
        Ok(report)
    }

    /// Worker loop: immediate sweep, then one per interval.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("retention enforcer started");
        let mut policy_rx = self.policy.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let policy = self.policy();
            if !policy.enabled {
                // Sweeping disabled: sleep until the policy flips or we stop
                tokio::select! {
                    _ = policy_rx.changed() => continue,
                    _ = shutdown.changed() => continue,
                }
            }

            if let Err(e) = self.enforce_retention_policy().await {
                tracing::warn!("[retention] sweep failed (will retry next interval): {}", e);
            }

            let interval = Duration::from_secs(u64::from(policy.cleanup_interval_hours) * 3600);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = policy_rx.changed() => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("retention enforcer shutting down");
    }
}

/// Spawn the retention worker. Returns the shutdown signal sender.
pub fn spawn(enforcer: Arc<RetentionEnforcer>) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        enforcer.run(shutdown_rx).await;
    });

    shutdown_tx
}
