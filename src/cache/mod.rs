// src/cache/mod.rs
// Session cache: short-TTL session state and indexing sets
//
// Sessions live only here, keyed `session:{id}` with a configurable TTL
// (default 24h). Three status sets index them: `sessions:active`,
// `sessions:completed`, `sessions:failed`, plus per-agent and per-project
// sets for lookup. Set membership reflects the most recent terminal call;
// a terminal transition removes from `active` before adding to the
// terminal set so the sets never overlap.
//
// All operations fail-soft at the integration layer: callers that treat
// session persistence as best-effort downgrade `CacheUnavailable` to a
// warning and continue.

pub mod store;

pub use store::{MemoryStore, RedisStore, SessionStore};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::types::{SessionState, SessionStatus};
use crate::utils::now_millis;
use futures::future::join_all;
use std::sync::Arc;

/// Index set of live sessions.
pub const ACTIVE_SET: &str = "sessions:active";
/// Index set of successfully finished sessions.
pub const COMPLETED_SET: &str = "sessions:completed";
/// Index set of failed sessions.
pub const FAILED_SET: &str = "sessions:failed";

/// Registry of agent ids with a `sessions:agent:{id}` index set. The
/// protocol has no key enumeration, so the sweep discovers per-agent
/// sets through this registry.
const AGENT_REGISTRY: &str = "sessions:agents";
/// Registry of project ids with a `sessions:project:{id}` index set.
const PROJECT_REGISTRY: &str = "sessions:projects";

/// How many completed sessions feed the average-duration statistic.
const STATS_WINDOW: usize = 100;

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn agent_set(agent_id: &str) -> String {
    format!("sessions:agent:{agent_id}")
}

fn project_set(project_id: &str) -> String {
    format!("sessions:project:{project_id}")
}

/// Aggregate counts over the session index sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Average wall-clock duration over a bounded recent window of
    /// completed sessions, in millis. Zero when the window is empty.
    pub avg_duration_millis: f64,
}

/// Live session state and lookup sets over a pluggable key/value backend.
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    ttl_seconds: u64,
}

impl SessionCache {
    /// Connect per configuration: a cache server when a host is set,
    /// otherwise the in-process store.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let store: Arc<dyn SessionStore> = if config.is_configured() {
            Arc::new(RedisStore::connect(config).await?)
        } else {
            Arc::new(MemoryStore::new())
        };
        Ok(Self {
            store,
            ttl_seconds: config.session_ttl_seconds,
        })
    }

    /// In-process cache with the given TTL. Used in tests and as the
    /// fallback when no cache host is configured.
    pub fn in_process(ttl_seconds: u64) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            ttl_seconds,
        }
    }

    /// Cache over an explicit backend.
    pub fn with_store(store: Arc<dyn SessionStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    async fn write_session(&self, session: &SessionState) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.store
            .set_ex(&session_key(&session.session_id), &json, self.ttl_seconds)
            .await
    }

    /// Record a newly started session and index it.
    pub async fn create_session(&self, session: &SessionState) -> Result<()> {
        self.write_session(session).await?;
        self.store.sadd(ACTIVE_SET, &session.session_id).await?;
        self.store
            .sadd(&agent_set(&session.agent_id), &session.session_id)
            .await?;
        self.store
            .sadd(&project_set(&session.project_id), &session.session_id)
            .await?;
        // Register the owning ids so the expiry sweep can find these sets
        self.store.sadd(AGENT_REGISTRY, &session.agent_id).await?;
        self.store
            .sadd(PROJECT_REGISTRY, &session.project_id)
            .await?;
        Ok(())
    }

    /// Fetch a session. Returns None when missing or expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let raw = self.store.get(&session_key(session_id)).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    tracing::warn!(session_id, "undecodable session state dropped: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Read-modify-write: bump `thought_count`, refresh `last_activity`
    /// and the TTL. Returns the updated state, or None for a session
    /// that is gone.
    pub async fn update_activity(&self, session_id: &str) -> Result<Option<SessionState>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.last_activity = now_millis();
        session.thought_count += 1;
        self.write_session(&session).await?;
        Ok(Some(session))
    }

    /// Move a session from active to its terminal set.
    ///
    /// Idempotent: completing an already-terminal (or expired) session is
    /// a successful no-op.
    pub async fn complete_session(&self, session_id: &str, success: bool) -> Result<()> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(());
        };
        if session.status.is_terminal() {
            return Ok(());
        }

        session.status = if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        session.last_activity = now_millis();

        let terminal_set = if success { COMPLETED_SET } else { FAILED_SET };
        // Remove from active before adding to the terminal set so the
        // index sets stay disjoint at every observable point.
        self.store.srem(ACTIVE_SET, session_id).await?;
        self.store.sadd(terminal_set, session_id).await?;
        self.write_session(&session).await?;
        Ok(())
    }

    /// Load the live sessions behind an index set, pruning members whose
    /// keys have expired along the way.
    async fn load_set(&self, set: &str) -> Result<Vec<SessionState>> {
        let members = self.store.smembers(set).await?;
        let lookups = members
            .iter()
            .map(|id| self.get_session(id))
            .collect::<Vec<_>>();

        let mut sessions = Vec::new();
        for (member, result) in members.iter().zip(join_all(lookups).await) {
            match result? {
                Some(session) => sessions.push(session),
                None => {
                    // Expired entry still indexed; removal is idempotent.
                    self.store.srem(set, member).await?;
                }
            }
        }
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    pub async fn get_active_sessions(&self) -> Result<Vec<SessionState>> {
        self.load_set(ACTIVE_SET).await
    }

    pub async fn get_sessions_by_agent(&self, agent_id: &str) -> Result<Vec<SessionState>> {
        self.load_set(&agent_set(agent_id)).await
    }

    pub async fn get_sessions_by_project(&self, project_id: &str) -> Result<Vec<SessionState>> {
        self.load_set(&project_set(project_id)).await
    }

    /// Counts across the status sets plus average duration of recently
    /// completed sessions (bounded window).
    pub async fn get_stats(&self) -> Result<CacheStats> {
        let active = self.store.scard(ACTIVE_SET).await?;
        let completed = self.store.scard(COMPLETED_SET).await?;
        let failed = self.store.scard(FAILED_SET).await?;

        let mut durations = Vec::new();
        for member in self
            .store
            .smembers(COMPLETED_SET)
            .await?
            .into_iter()
            .take(STATS_WINDOW)
        {
            if let Some(session) = self.get_session(&member).await? {
                durations.push((session.last_activity - session.start_time).max(0) as f64);
            }
        }
        let avg_duration_millis = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Ok(CacheStats {
            active,
            completed,
            failed,
            avg_duration_millis,
        })
    }

    /// Sweep one index set, dropping members whose session keys expired.
    async fn sweep_set(&self, set: &str) -> Result<usize> {
        let mut removed = 0;
        for member in self.store.smembers(set).await? {
            if self.get_session(&member).await?.is_none() {
                self.store.srem(set, &member).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop index entries whose session keys have expired, across the
    /// status sets and every registered per-agent/per-project set.
    ///
    /// Safe to run concurrently with writers; every removal is idempotent.
    /// Returns the number of index entries removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let mut removed = 0;
        for set in [ACTIVE_SET, COMPLETED_SET, FAILED_SET] {
            removed += self.sweep_set(set).await?;
        }

        for (registry, set_for) in [
            (AGENT_REGISTRY, agent_set as fn(&str) -> String),
            (PROJECT_REGISTRY, project_set as fn(&str) -> String),
        ] {
            for owner in self.store.smembers(registry).await? {
                let set = set_for(&owner);
                removed += self.sweep_set(&set).await?;
                // A drained set means the owner has no live sessions left;
                // drop the registry entry so it stops being scanned.
                // createSession re-registers on the next session.
                if self.store.scard(&set).await? == 0 {
                    self.store.srem(registry, &owner).await?;
                }
            }
        }
        Ok(removed)
    }
}
