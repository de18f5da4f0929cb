// src/db/schema.rs
// Database schema and migrations

use crate::error::{ContextError, Result};
use rusqlite::{Connection, OptionalExtension};

/// Current on-disk schema version. Stored in the `meta` table; a mismatch
/// on open fails with `SchemaMismatch` rather than guessing at a migration.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all schema setup.
///
/// Called during pool initialization. Idempotent - tables are created only
/// if missing and the version gate runs after table creation.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    check_schema_version(conn)?;
    Ok(())
}

/// Verify (or stamp, on first open) the schema version in `meta`.
fn check_schema_version(conn: &Connection) -> Result<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match found {
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;
            tracing::info!(version = SCHEMA_VERSION, "schema initialized");
            Ok(())
        }
        Some(raw) => {
            let found = raw.parse::<i64>().unwrap_or(-1);
            if found != SCHEMA_VERSION {
                return Err(ContextError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            Ok(())
        }
    }
}

/// Database schema SQL
///
/// All timestamps are integer epoch-millis. The compound indexes back the
/// hot query paths: per-project newest-first listings, status-filtered task
/// scans, and importance-ordered memory retrieval.
pub const SCHEMA: &str = r#"
-- =======================================
-- META: schema versioning
-- =======================================
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- =======================================
-- CORE: Projects
-- =======================================
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    repository_url TEXT,
    created_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

-- =======================================
-- TASKS
-- =======================================
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    assigned_to TEXT,
    princess_id TEXT,
    drone_id TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    result TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_tasks_project_status ON tasks(project_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assigned_to, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);

-- =======================================
-- CONVERSATIONS (append-only)
-- =======================================
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    task_id TEXT,
    role TEXT NOT NULL,
    agent_id TEXT,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project_id);
CREATE INDEX IF NOT EXISTS idx_conversations_project_agent ON conversations(project_id, agent_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_task ON conversations(task_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(created_at);

-- =======================================
-- ARTIFACT REFERENCES (paths and metadata only, never blob bytes)
-- =======================================
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    task_id TEXT,
    artifact_type TEXT NOT NULL,
    name TEXT NOT NULL,
    object_path TEXT,
    local_path TEXT,
    external_url TEXT,
    size_bytes INTEGER,
    created_at INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_artifacts_project ON artifacts(project_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_artifacts_type ON artifacts(project_id, artifact_type);
CREATE INDEX IF NOT EXISTS idx_artifacts_created ON artifacts(created_at);

-- =======================================
-- AGENT MEMORIES
-- =======================================
CREATE TABLE IF NOT EXISTS agent_memories (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    task_id TEXT,
    memory_type TEXT NOT NULL,
    content TEXT NOT NULL,
    importance REAL NOT NULL,
    created_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON agent_memories(agent_id, importance DESC, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_project_type ON agent_memories(project_id, memory_type, importance DESC);
CREATE INDEX IF NOT EXISTS idx_memories_project ON agent_memories(project_id);
CREATE INDEX IF NOT EXISTS idx_memories_created ON agent_memories(created_at);

-- =======================================
-- FULL-TEXT SEARCH (FTS5)
-- =======================================
-- Tasks, conversations, and memories mirror their searchable content here.
-- created_at is carried so rank ties break newest-first.
CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
    content,
    project_id UNINDEXED,
    task_id UNINDEXED,
    source_type UNINDEXED,
    source_id UNINDEXED,
    created_at UNINDEXED,
    tokenize='porter unicode61 remove_diacritics 1'
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_version_stamped_on_first_open() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_version_mismatch_fails() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "UPDATE meta SET value = '999' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(
            err,
            ContextError::SchemaMismatch {
                found: 999,
                expected: SCHEMA_VERSION
            }
        ));
    }
}
