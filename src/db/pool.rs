// src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// The primary API is `pool.interact()`: the closure runs on a blocking
// thread with a pooled connection, so database work never blocks the
// async runtime. WAL journaling allows concurrent readers while SQLite
// serializes the single writer; residual write contention is retried
// with bounded backoff and surfaces as `Conflict` when exhausted.

use crate::error::{ContextError, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Database pool wrapper with per-connection setup.
#[derive(Debug)]
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

/// Whether to use a file path or a shared in-memory URI.
enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared cache URI so all connections access the same in-memory
    /// database. This is critical for tests - without shared cache, each
    /// connection would get its own separate in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory).await
    }

    async fn open_internal(storage: DbStorage) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().into_owned();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!(
                    "file:memdb_{}?mode=memory&cache=shared",
                    uuid::Uuid::new_v4().simple()
                );
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| ContextError::StorageUnavailable(format!("pool builder: {e}")))?
            .max_size(8)
            .post_create(hook)
            .build()
            .map_err(|e| ContextError::StorageUnavailable(format!("pool build: {e}")))?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool.run_migrations().await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// # Example
    /// ```ignore
    /// let task = pool.interact(move |conn| get_task_sync(conn, &id)).await?;
    /// ```
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| ContextError::StorageUnavailable(format!("pool exhausted: {e}")))?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| ContextError::StorageUnavailable(format!("interact failed: {e}")))?
    }

    /// Like [`interact`](Self::interact) but with retry on SQLite contention.
    ///
    /// Use for critical writes that must not be lost. The closure must be
    /// `Clone` to support retries. Exhausted retries surface as `Conflict`.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        for delay in RETRY_DELAYS {
            let attempt = f.clone();
            match self.interact(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_contention() => {
                    tracing::warn!("SQLite contention, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.interact(f).await
    }

    /// Run a closure, logging errors at debug without propagating.
    /// Use for low-priority best-effort operations.
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(f).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }

    /// Like `try_interact` but logs failures at warn level.
    /// Use for important best-effort operations (conversation mirroring,
    /// session bookkeeping).
    pub async fn try_interact_warn<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(f).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure inside an explicit transaction.
    ///
    /// The transaction commits when the closure returns `Ok` and rolls back
    /// on `Err`. This is the composition point for callers needing
    /// multi-statement atomicity.
    pub async fn with_tx<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| ContextError::StorageUnavailable(format!("pool exhausted: {e}")))?;

        conn.interact(move |conn| {
            let tx = conn.transaction().map_err(ContextError::from)?;
            let result = f(&tx)?;
            tx.commit().map_err(ContextError::from)?;
            Ok(result)
        })
        .await
        .map_err(|e| ContextError::StorageUnavailable(format!("interact failed: {e}")))?
    }

    /// Reclaim free pages and refresh the query planner's statistics.
    pub async fn compact(&self) -> Result<()> {
        self.interact(|conn| {
            conn.execute_batch("VACUUM; PRAGMA optimize;")
                .map_err(ContextError::from)
        })
        .await
    }

    /// Flush and release all pooled connections.
    pub async fn close(&self) {
        self.pool.close();
    }

    /// Run schema migrations on a pooled connection.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_migrations(conn)?;
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                tracing::debug!("PRAGMA optimize skipped: {}", e);
            }
            Ok(())
        })
        .await
    }
}

/// Ensure parent directory exists with restricted permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Create a post_create hook for file-based databases.
///
/// Sets up PRAGMAs via `setup_connection` and restricts file permissions to 0o600.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Create a post_create hook for in-memory databases.
///
/// Enables foreign keys and busy_timeout (WAL is not applicable in-memory).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
///
/// WAL for concurrent reads under a single writer, foreign key enforcement,
/// a 5s busy window for write contention, and NORMAL synchronous mode
/// (safe with WAL, reduces fsync overhead).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_millis;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        let now = now_millis();
        pool.interact(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at, last_accessed_at) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params!["p1", "test", now],
            )
            .map_err(ContextError::from)
        })
        .await
        .expect("Failed to insert");

        // Verify from another connection in the pool (tests shared cache)
        let name: String = pool
            .interact(|conn| {
                conn.query_row("SELECT name FROM projects WHERE id = 'p1'", [], |row| {
                    row.get(0)
                })
                .map_err(ContextError::from)
            })
            .await
            .expect("Failed to query");

        assert_eq!(name, "test");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            DatabasePool::open_in_memory()
                .await
                .expect("Failed to open pool"),
        );

        let now = now_millis();
        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.interact_with_retry(move |conn| {
                    conn.execute(
                        "INSERT INTO projects (id, name, created_at, last_accessed_at) VALUES (?1, ?2, ?3, ?3)",
                        rusqlite::params![format!("p{i}"), format!("project-{i}"), now],
                    )
                    .map_err(ContextError::from)?;
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
                    .map_err(ContextError::from)
            })
            .await
            .expect("Count failed");

        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_with_tx_rolls_back_on_error() {
        let pool = DatabasePool::open_in_memory().await.unwrap();

        let now = now_millis();
        let result: Result<()> = pool
            .with_tx(move |tx| {
                tx.execute(
                    "INSERT INTO projects (id, name, created_at, last_accessed_at) VALUES ('p1', 'x', ?1, ?1)",
                    [now],
                )
                .map_err(ContextError::from)?;
                Err(ContextError::Other("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
                    .map_err(ContextError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 0, "transaction should have rolled back");
    }

    #[tokio::test]
    async fn test_schema_mismatch_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("context-dna.db");

        {
            let pool = DatabasePool::open(&db_path).await.unwrap();
            pool.interact(|conn| {
                conn.execute(
                    "UPDATE meta SET value = '42' WHERE key = 'schema_version'",
                    [],
                )
                .map_err(ContextError::from)
            })
            .await
            .unwrap();
            pool.close().await;
        }

        let err = DatabasePool::open(&db_path).await.unwrap_err();
        assert!(matches!(err, ContextError::SchemaMismatch { found: 42, .. }));
    }
}
