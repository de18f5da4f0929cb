// src/db/mod.rs
// Primary store: embedded relational storage with full-text search

pub mod artifacts;
pub mod conversations;
pub mod memory;
pub mod pool;
pub mod projects;
pub mod retention;
pub mod schema;
pub mod search;
pub mod tasks;

#[cfg(test)]
pub mod test_support;

pub use artifacts::{
    get_artifact_sync, get_artifacts_by_type_sync, get_artifacts_for_project_sync,
    save_artifact_sync,
};
pub use conversations::{
    get_conversation_sync, get_conversations_by_agent_sync, get_conversations_for_project_sync,
    get_conversations_for_task_sync, save_conversation_sync,
};
pub use memory::{
    get_agent_memories_by_type_sync, get_agent_memories_sync, get_memory_sync,
    save_agent_memory_sync, touch_memories_sync,
};
pub use pool::DatabasePool;
pub use projects::{
    delete_project_sync, ensure_project_sync, get_project_sync, save_project_sync,
    touch_project_sync,
};
pub use retention::{StoreStats, cleanup_old_entries_sync, count_expired_sync, get_stats_sync};
pub use search::{SearchQuery, cleanup_orphan_search_rows_sync, search_sync};
pub use tasks::{
    get_task_sync, get_tasks_by_assignee_sync, get_tasks_by_status_sync,
    get_tasks_for_project_sync, save_task_sync,
};

use crate::types::Metadata;

/// Serialize an entity metadata map for storage.
pub(crate) fn metadata_to_json(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a stored metadata column, tolerating rows written by other versions.
pub(crate) fn metadata_from_json(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_default()
}
