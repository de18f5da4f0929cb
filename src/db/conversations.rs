// src/db/conversations.rs
// Conversation operations (append-only)

use super::search::upsert_search_row_sync;
use super::{metadata_from_json, metadata_to_json, projects::touch_project_sync};
use crate::error::Result;
use crate::types::{Conversation, ConversationRole, SourceType};
use rusqlite::{Connection, OptionalExtension, Row, params};

const CONVERSATION_COLUMNS: &str =
    "id, project_id, task_id, role, agent_id, content, created_at, metadata";

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        project_id: row.get(1)?,
        task_id: row.get(2)?,
        role: ConversationRole::parse(&row.get::<_, String>(3)?),
        agent_id: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        metadata: metadata_from_json(&row.get::<_, String>(7)?),
    })
}

/// Insert a conversation turn and mirror its content into the search index.
///
/// Conversations are append-only: a duplicate id fails the primary key and
/// surfaces as `ConstraintViolation`; there is no update path.
pub fn save_conversation_sync(conn: &Connection, conversation: &Conversation) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, project_id, task_id, role, agent_id, content, created_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            conversation.id,
            conversation.project_id,
            conversation.task_id,
            conversation.role.as_str(),
            conversation.agent_id,
            conversation.content,
            conversation.created_at,
            metadata_to_json(&conversation.metadata),
        ],
    )?;

    upsert_search_row_sync(
        conn,
        &conversation.id,
        SourceType::Conversation,
        &conversation.project_id,
        conversation.task_id.as_deref(),
        &conversation.content,
        conversation.created_at,
    )?;
    touch_project_sync(conn, &conversation.project_id, crate::utils::now_millis())?;
    Ok(())
}

/// Get a conversation by id. Returns None on miss.
pub fn get_conversation_sync(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            row_to_conversation,
        )
        .optional()?;
    Ok(conversation)
}

/// Conversations for a project, newest first.
pub fn get_conversations_for_project_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE project_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], row_to_conversation)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Conversations attached to a task, oldest first (reading order).
pub fn get_conversations_for_task_sync(
    conn: &Connection,
    task_id: &str,
    limit: usize,
) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE task_id = ?1
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![task_id, limit as i64], row_to_conversation)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Conversations authored by an agent within a project, newest first.
pub fn get_conversations_by_agent_sync(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
    limit: usize,
) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE project_id = ?1 AND agent_id = ?2
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![project_id, agent_id, limit as i64],
        row_to_conversation,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}
