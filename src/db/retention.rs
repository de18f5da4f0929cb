// src/db/retention.rs
// Retention deletes and store statistics

use super::search::cleanup_orphan_search_rows_sync;
use crate::error::Result;
use rusqlite::Connection;

/// Tables swept by retention, children before parents so FK cascades never
/// fire mid-sweep. Projects come last: an expired project takes whatever
/// children remain with it.
const RETENTION_TABLES: [&str; 5] = [
    "conversations",
    "agent_memories",
    "artifacts",
    "tasks",
    "projects",
];

/// Batch size for retention deletes. Bounded batches keep the write lock
/// short so readers are not starved during large backlogs.
const DELETE_BATCH: usize = 10_000;

/// Delete rows older than `cutoff_millis` from every entity table.
///
/// Returns the number of rows deleted directly (cascade victims of expired
/// projects are not counted). A cutoff of 0 deletes nothing. Orphaned
/// search rows are swept afterwards.
pub fn cleanup_old_entries_sync(conn: &Connection, cutoff_millis: i64) -> Result<usize> {
    let mut total_deleted = 0;

    for table in RETENTION_TABLES {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN \
             (SELECT rowid FROM {table} WHERE created_at < ?1 LIMIT {DELETE_BATCH})"
        );

        loop {
            let deleted = conn.execute(&sql, [cutoff_millis])?;
            if deleted == 0 {
                break;
            }
            total_deleted += deleted;
            tracing::info!(
                "[retention] deleted {} rows from {} (created before {})",
                deleted,
                table,
                cutoff_millis
            );
            if deleted < DELETE_BATCH {
                break;
            }
        }
    }

    if total_deleted > 0 {
        cleanup_orphan_search_rows_sync(conn)?;
    }

    Ok(total_deleted)
}

/// Dry-run: count how many rows each table would lose at the given cutoff.
/// Returns (table_name, candidate_count) pairs for tables with candidates.
pub fn count_expired_sync(conn: &Connection, cutoff_millis: i64) -> Result<Vec<(String, usize)>> {
    let mut results = Vec::new();
    for table in RETENTION_TABLES {
        let count: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE created_at < ?1"),
            [cutoff_millis],
            |row| row.get(0),
        )?;
        if count > 0 {
            results.push((table.to_string(), count));
        }
    }
    Ok(results)
}

/// Aggregate statistics over the primary store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub projects: i64,
    pub tasks: i64,
    pub conversations: i64,
    pub artifacts: i64,
    pub memories: i64,
    /// Oldest created_at across all entity tables (None when empty)
    pub oldest_created_at: Option<i64>,
    /// Newest created_at across all entity tables (None when empty)
    pub newest_created_at: Option<i64>,
    /// On-disk size: page_count x page_size
    pub storage_bytes: i64,
    /// Sum of ArtifactReference.size_bytes. Tracked only; blobs live
    /// out-of-band and never count against store size.
    pub referenced_artifact_bytes: i64,
}

fn count_table(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Collect row counts, created_at bounds, and storage size.
pub fn get_stats_sync(conn: &Connection) -> Result<StoreStats> {
    let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
        "SELECT MIN(a), MAX(b) FROM (
             SELECT MIN(created_at) AS a, MAX(created_at) AS b FROM projects
             UNION ALL SELECT MIN(created_at), MAX(created_at) FROM tasks
             UNION ALL SELECT MIN(created_at), MAX(created_at) FROM conversations
             UNION ALL SELECT MIN(created_at), MAX(created_at) FROM artifacts
             UNION ALL SELECT MIN(created_at), MAX(created_at) FROM agent_memories
         )",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;

    let referenced_artifact_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM artifacts",
        [],
        |row| row.get(0),
    )?;

    Ok(StoreStats {
        projects: count_table(conn, "projects")?,
        tasks: count_table(conn, "tasks")?,
        conversations: count_table(conn, "conversations")?,
        artifacts: count_table(conn, "artifacts")?,
        memories: count_table(conn, "agent_memories")?,
        oldest_created_at: oldest,
        newest_created_at: newest,
        storage_bytes: page_count * page_size,
        referenced_artifact_bytes,
    })
}
