// src/db/test_support.rs
// Shared test helpers for database tests

use super::pool::DatabasePool;
use crate::types::{
    AgentMemory, Conversation, ConversationRole, MemoryType, Task, TaskStatus,
};
use crate::utils::now_millis;
use rusqlite::Connection;
use std::sync::Arc;

/// Create a sync in-memory connection with the schema applied.
/// Use this for sync tests that don't need async pool semantics.
pub fn setup_test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    super::schema::run_migrations(&conn).unwrap();
    conn
}

/// Create a test pool (in-memory DB, shared cache across connections).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Seed a project stub.
pub fn seed_project(conn: &Connection, project_id: &str) {
    super::projects::ensure_project_sync(conn, project_id, now_millis()).unwrap();
}

/// Seed a task with sensible defaults. Returns the record as written.
pub fn seed_task(
    conn: &Connection,
    project_id: &str,
    task_id: &str,
    description: &str,
    status: TaskStatus,
) -> Task {
    let now = now_millis();
    let task = Task {
        id: task_id.to_string(),
        project_id: project_id.to_string(),
        description: description.to_string(),
        status,
        assigned_to: None,
        princess_id: None,
        drone_id: None,
        created_at: now,
        completed_at: status.is_terminal().then_some(now),
        result: None,
        metadata: Default::default(),
    };
    super::tasks::save_task_sync(conn, &task).unwrap();
    task
}

/// Seed an agent-role conversation turn. Returns the record as written.
pub fn seed_conversation(
    conn: &Connection,
    project_id: &str,
    conversation_id: &str,
    agent_id: &str,
    content: &str,
) -> Conversation {
    let conversation = Conversation {
        id: conversation_id.to_string(),
        project_id: project_id.to_string(),
        task_id: None,
        role: ConversationRole::Agent,
        agent_id: Some(agent_id.to_string()),
        content: content.to_string(),
        created_at: now_millis(),
        metadata: Default::default(),
    };
    super::conversations::save_conversation_sync(conn, &conversation).unwrap();
    conversation
}

/// Seed an agent memory. Returns the record as written.
pub fn seed_memory(
    conn: &Connection,
    project_id: &str,
    memory_id: &str,
    agent_id: &str,
    memory_type: MemoryType,
    importance: f64,
) -> AgentMemory {
    let now = now_millis();
    let memory = AgentMemory {
        id: memory_id.to_string(),
        agent_id: agent_id.to_string(),
        project_id: project_id.to_string(),
        task_id: None,
        memory_type,
        content: format!("memory {memory_id}"),
        importance,
        created_at: now,
        last_accessed_at: now,
        access_count: 0,
        metadata: Default::default(),
    };
    super::memory::save_agent_memory_sync(conn, &memory).unwrap();
    memory
}
