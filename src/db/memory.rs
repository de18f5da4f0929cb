// src/db/memory.rs
// Agent memory operations

use super::search::upsert_search_row_sync;
use super::{metadata_from_json, metadata_to_json, projects::touch_project_sync};
use crate::error::{ContextError, Result};
use crate::types::{AgentMemory, MemoryType, SourceType};
use rusqlite::{Connection, OptionalExtension, Row, params};

const MEMORY_COLUMNS: &str = "id, agent_id, project_id, task_id, memory_type, content, \
     importance, created_at, last_accessed_at, access_count, metadata";

fn row_to_memory(row: &Row) -> rusqlite::Result<AgentMemory> {
    Ok(AgentMemory {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        project_id: row.get(2)?,
        task_id: row.get(3)?,
        memory_type: MemoryType::parse(&row.get::<_, String>(4)?),
        content: row.get(5)?,
        importance: row.get(6)?,
        created_at: row.get(7)?,
        last_accessed_at: row.get(8)?,
        access_count: row.get(9)?,
        metadata: metadata_from_json(&row.get::<_, String>(10)?),
    })
}

/// Upsert an agent memory by id and mirror its content into the search index.
///
/// `importance` must be within [0, 1].
pub fn save_agent_memory_sync(conn: &Connection, memory: &AgentMemory) -> Result<()> {
    if !(0.0..=1.0).contains(&memory.importance) {
        return Err(ContextError::ConstraintViolation(format!(
            "memory {}: importance {} outside [0, 1]",
            memory.id, memory.importance
        )));
    }
    if memory.access_count < 0 {
        return Err(ContextError::ConstraintViolation(format!(
            "memory {}: negative access_count",
            memory.id
        )));
    }

    conn.execute(
        "INSERT INTO agent_memories (id, agent_id, project_id, task_id, memory_type, content,
                                     importance, created_at, last_accessed_at, access_count, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             memory_type = excluded.memory_type,
             importance = excluded.importance,
             last_accessed_at = excluded.last_accessed_at,
             access_count = excluded.access_count,
             metadata = excluded.metadata",
        params![
            memory.id,
            memory.agent_id,
            memory.project_id,
            memory.task_id,
            memory.memory_type.as_str(),
            memory.content,
            memory.importance,
            memory.created_at,
            memory.last_accessed_at,
            memory.access_count,
            metadata_to_json(&memory.metadata),
        ],
    )?;

    upsert_search_row_sync(
        conn,
        &memory.id,
        SourceType::Memory,
        &memory.project_id,
        memory.task_id.as_deref(),
        &memory.content,
        memory.created_at,
    )?;
    touch_project_sync(conn, &memory.project_id, crate::utils::now_millis())?;
    Ok(())
}

/// Get a memory by id. Returns None on miss.
pub fn get_memory_sync(conn: &Connection, id: &str) -> Result<Option<AgentMemory>> {
    let memory = conn
        .query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM agent_memories WHERE id = ?1"),
            [id],
            row_to_memory,
        )
        .optional()?;
    Ok(memory)
}

/// Memories for an agent, most important first.
///
/// Filters by an optional project and a minimum importance. Ordering is
/// `importance DESC, last_accessed_at DESC`.
pub fn get_agent_memories_sync(
    conn: &Connection,
    agent_id: &str,
    project_id: Option<&str>,
    min_importance: f64,
    limit: usize,
) -> Result<Vec<AgentMemory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM agent_memories
         WHERE agent_id = ?1
           AND (?2 IS NULL OR project_id = ?2)
           AND importance >= ?3
         ORDER BY importance DESC, last_accessed_at DESC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(
        params![agent_id, project_id, min_importance, limit as i64],
        row_to_memory,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Memories of one kind for an agent, most important first.
///
/// Same shape as `get_agent_memories_sync` with the type predicate pushed
/// into SQL, so the limit is taken over qualifying rows only (backed by
/// the `(project_id, memory_type, importance DESC)` index when a project
/// is given).
pub fn get_agent_memories_by_type_sync(
    conn: &Connection,
    agent_id: &str,
    project_id: Option<&str>,
    memory_type: MemoryType,
    min_importance: f64,
    limit: usize,
) -> Result<Vec<AgentMemory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM agent_memories
         WHERE agent_id = ?1
           AND (?2 IS NULL OR project_id = ?2)
           AND memory_type = ?3
           AND importance >= ?4
         ORDER BY importance DESC, last_accessed_at DESC
         LIMIT ?5"
    ))?;
    let rows = stmt.query_map(
        params![
            agent_id,
            project_id,
            memory_type.as_str(),
            min_importance,
            limit as i64
        ],
        row_to_memory,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Record retrieval of a batch of memories: bump `access_count` and
/// refresh `last_accessed_at`. Content is never touched.
pub fn touch_memories_sync(conn: &Connection, ids: &[String], now: i64) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<_> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "UPDATE agent_memories
         SET access_count = access_count + 1, last_accessed_at = {now}
         WHERE id IN ({})",
        placeholders.join(",")
    );
    let sql_params: Vec<&dyn rusqlite::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let updated = conn.execute(&sql, sql_params.as_slice())?;
    Ok(updated)
}
