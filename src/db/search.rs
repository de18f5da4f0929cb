// src/db/search.rs
// Full-text search over the FTS5 search_index

use crate::error::Result;
use crate::types::{SearchHit, SourceType};
use rusqlite::{Connection, params};

/// One full-text query against the mirrored content of tasks,
/// conversations, and memories.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub limit: usize,
}

/// Mirror (or re-mirror) one source row into the search index.
///
/// Delete-then-insert keeps the index consistent across upserts without
/// FTS5 external-content bookkeeping.
pub fn upsert_search_row_sync(
    conn: &Connection,
    source_id: &str,
    source_type: SourceType,
    project_id: &str,
    task_id: Option<&str>,
    content: &str,
    created_at: i64,
) -> Result<()> {
    delete_search_rows_for_source_sync(conn, source_id)?;
    conn.execute(
        "INSERT INTO search_index (content, project_id, task_id, source_type, source_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            content,
            project_id,
            task_id,
            source_type.as_str(),
            source_id,
            created_at,
        ],
    )?;
    Ok(())
}

/// Remove the search rows for one source entity.
pub fn delete_search_rows_for_source_sync(conn: &Connection, source_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM search_index WHERE source_id = ?1",
        [source_id],
    )?;
    Ok(deleted)
}

/// Drop search rows whose source entity no longer exists.
///
/// The FTS virtual table has no foreign keys, so retention and cascade
/// deletes are followed by this sweep.
pub fn cleanup_orphan_search_rows_sync(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM search_index WHERE
             (source_type = 'task' AND source_id NOT IN (SELECT id FROM tasks))
          OR (source_type = 'conversation' AND source_id NOT IN (SELECT id FROM conversations))
          OR (source_type = 'memory' AND source_id NOT IN (SELECT id FROM agent_memories))",
        [],
    )?;
    if deleted > 0 {
        tracing::debug!("cleaned up {} orphaned search rows", deleted);
    }
    Ok(deleted)
}

/// Quote user terms for FTS5 MATCH.
///
/// Each whitespace token becomes a quoted phrase so query operators and
/// punctuation in user text cannot break the MATCH expression.
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokenized full-text search with per-document ranking.
///
/// bm25 ranks lower-is-better; hits carry `score = -rank` so higher is
/// more relevant. Rank ties break newest-first.
pub fn search_sync(conn: &Connection, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    if query.limit == 0 || query.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let match_expr = fts_match_expr(&query.query);
    let mut stmt = conn.prepare(
        "SELECT source_id, source_type, content, bm25(search_index) AS rank
         FROM search_index
         WHERE search_index MATCH ?1
           AND (?2 IS NULL OR project_id = ?2)
           AND (?3 IS NULL OR task_id = ?3)
         ORDER BY rank ASC, created_at DESC
         LIMIT ?4",
    )?;

    let rows = stmt.query_map(
        params![
            match_expr,
            query.project_id,
            query.task_id,
            query.limit as i64
        ],
        |row| {
            Ok(SearchHit {
                source_id: row.get(0)?,
                source_type: SourceType::parse(&row.get::<_, String>(1)?),
                content: row.get(2)?,
                score: -row.get::<_, f64>(3)?,
            })
        },
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}
