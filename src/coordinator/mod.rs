// src/coordinator/mod.rs
// Memory coordinator: cross-agent sharing and delegation-chain inheritance
//
// The delegation chain (Queen -> Princess -> Drone) is never a pointer
// cycle: inherited entities are fresh copies owned by the child, linked
// back to their source through metadata (`shared_from`,
// `original_memory_id`, `original_conversation_id`). Source entities are
// never mutated by sharing.

use crate::db::{
    self, DatabasePool, get_agent_memories_sync, get_conversations_by_agent_sync,
    get_tasks_by_assignee_sync, save_agent_memory_sync, save_conversation_sync,
};
use crate::error::Result;
use crate::retrieval::{ContextRetriever, RetrievalFilter};
use crate::types::{
    AgentMemory, Conversation, ConversationRole, MemoryType, Task,
};
use crate::utils::{new_id, now_millis};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Importance floor for context inherited along the delegation chain.
const INHERIT_MIN_IMPORTANCE: f64 = 0.5;

/// Default bound on memories read from the source agent per share.
const DEFAULT_SHARE_LIMIT: usize = 50;

/// Parameters for copying memories from one agent to another.
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub project_id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    /// When set, only these memory kinds are shared.
    pub memory_types: Option<Vec<MemoryType>>,
    pub min_importance: Option<f64>,
    pub limit: Option<usize>,
}

/// Result of a share: how many copies were minted, and the copies.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub shared: usize,
    pub memories: Vec<AgentMemory>,
}

/// Parameters for delegation-chain context inheritance.
#[derive(Debug, Clone)]
pub struct InheritRequest {
    pub project_id: String,
    pub parent_agent_id: String,
    pub child_agent_id: String,
    pub task_id: Option<String>,
    pub include_conversations: bool,
    pub include_memories: bool,
    pub include_tasks: bool,
}

impl InheritRequest {
    /// Inherit everything from parent to child within a project.
    pub fn new(project_id: &str, parent_agent_id: &str, child_agent_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            parent_agent_id: parent_agent_id.to_string(),
            child_agent_id: child_agent_id.to_string(),
            task_id: None,
            include_conversations: true,
            include_memories: true,
            include_tasks: true,
        }
    }
}

/// Per-kind counts produced by `inherit_context`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritedCounts {
    pub conversations: usize,
    pub memories: usize,
    pub tasks: usize,
}

/// Importance bounds for filtered search.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceRange {
    pub min: f64,
    pub max: f64,
}

/// Filters applied to a coordinated context search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    /// Inclusive created_at bounds in epoch millis.
    pub date_range: Option<(i64, i64)>,
    pub memory_type: Option<MemoryType>,
    pub importance: Option<ImportanceRange>,
}

/// Filtered multi-source search results.
#[derive(Debug, Clone, Default)]
pub struct ContextSearchResults {
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
    pub tasks: Vec<Task>,
    pub total_results: usize,
}

/// Everything recently recorded for one agent within a project.
#[derive(Debug, Clone, Default)]
pub struct AgentContextSummary {
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
    pub tasks: Vec<Task>,
}

/// Cross-agent memory sharing and inheritance over the primary store.
pub struct MemoryCoordinator {
    db: Arc<DatabasePool>,
    retriever: ContextRetriever,
    /// Monotonic stamp source so repeated inheritance runs are ordered.
    inherit_clock: Mutex<i64>,
}

impl MemoryCoordinator {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        let retriever = ContextRetriever::new(db.clone());
        Self {
            db,
            retriever,
            inherit_clock: Mutex::new(0),
        }
    }

    fn next_stamp(&self) -> i64 {
        let mut last = self.inherit_clock.lock().unwrap_or_else(|p| p.into_inner());
        let next = now_millis().max(*last + 1);
        *last = next;
        next
    }

    /// Copy the source agent's memories to the target agent.
    ///
    /// Each copy is a fresh memory owned by the target with zero access
    /// count and provenance in metadata. Invoking twice with the same
    /// inputs creates two sets of copies; callers wanting idempotence must
    /// deduplicate on `metadata.original_memory_id`.
    pub async fn share_memories(&self, request: ShareRequest) -> Result<ShareOutcome> {
        let shared_at = self.next_stamp();
        self.db
            .interact(move |conn| {
                let sources = get_agent_memories_sync(
                    conn,
                    &request.source_agent_id,
                    Some(&request.project_id),
                    request.min_importance.unwrap_or(0.0),
                    request.limit.unwrap_or(DEFAULT_SHARE_LIMIT),
                )?;

                let mut copies = Vec::new();
                for source in sources {
                    if let Some(kinds) = &request.memory_types
                        && !kinds.contains(&source.memory_type)
                    {
                        continue;
                    }

                    let mut metadata = source.metadata.clone();
                    metadata.insert("shared_from".to_string(), json!(request.source_agent_id));
                    metadata.insert("original_memory_id".to_string(), json!(source.id));
                    metadata.insert("shared_at".to_string(), json!(shared_at));

                    let copy = AgentMemory {
                        id: new_id(),
                        agent_id: request.target_agent_id.clone(),
                        project_id: source.project_id.clone(),
                        task_id: source.task_id.clone(),
                        memory_type: source.memory_type,
                        content: source.content.clone(),
                        importance: source.importance,
                        created_at: shared_at,
                        last_accessed_at: shared_at,
                        access_count: 0,
                        metadata,
                    };
                    save_agent_memory_sync(conn, &copy)?;
                    copies.push(copy);
                }

                Ok(ShareOutcome {
                    shared: copies.len(),
                    memories: copies,
                })
            })
            .await
    }

    /// Seed a child agent with its parent's context.
    ///
    /// Conversations are copied as system turns prefixed with the parent's
    /// identity; memories are shared at the inheritance importance floor;
    /// tasks are counted only - the child learns about them through the
    /// delegation chain, not through duplication.
    pub async fn inherit_context(&self, request: InheritRequest) -> Result<InheritedCounts> {
        let mut counts = InheritedCounts::default();

        if request.include_conversations {
            let project_id = request.project_id.clone();
            let parent = request.parent_agent_id.clone();
            let child = request.child_agent_id.clone();
            let task_id = request.task_id.clone();
            let inherited_at = self.next_stamp();

            counts.conversations = self
                .db
                .interact(move |conn| {
                    // Listing is newest-first; copy oldest-first so the
                    // child's copies read in the original order
                    let sources =
                        get_conversations_by_agent_sync(conn, &project_id, &parent, 100)?;
                    let mut written = 0;
                    for (offset, source) in sources.iter().rev().enumerate() {
                        let mut metadata = serde_json::Map::new();
                        metadata
                            .insert("original_conversation_id".to_string(), json!(source.id));
                        metadata.insert("inherited_at".to_string(), json!(inherited_at));

                        let copy = Conversation {
                            id: new_id(),
                            project_id: project_id.clone(),
                            task_id: task_id.clone(),
                            role: ConversationRole::System,
                            agent_id: Some(child.clone()),
                            content: format!("[Inherited from {parent}] {}", source.content),
                            created_at: inherited_at + offset as i64,
                            metadata: metadata.into_iter().collect(),
                        };
                        save_conversation_sync(conn, &copy)?;
                        written += 1;
                    }
                    Ok(written)
                })
                .await?;
        }

        if request.include_memories {
            let outcome = self
                .share_memories(ShareRequest {
                    project_id: request.project_id.clone(),
                    source_agent_id: request.parent_agent_id.clone(),
                    target_agent_id: request.child_agent_id.clone(),
                    memory_types: None,
                    min_importance: Some(INHERIT_MIN_IMPORTANCE),
                    limit: None,
                })
                .await?;
            counts.memories = outcome.shared;
        }

        if request.include_tasks {
            let project_id = request.project_id.clone();
            let parent = request.parent_agent_id.clone();
            counts.tasks = self
                .db
                .interact(move |conn| {
                    db::tasks::count_tasks_by_assignee_sync(conn, &project_id, &parent)
                })
                .await?;
        }

        Ok(counts)
    }

    /// Full-text search with coordinator-level post-filters.
    pub async fn search_context(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<ContextSearchResults> {
        let retrieval_filter = RetrievalFilter {
            project_id: filters.project_id.clone(),
            task_id: filters.task_id.clone(),
            agent_id: filters.agent_id.clone(),
            limit: None,
        };
        let retrieved = self.retriever.retrieve_context(query, &retrieval_filter).await?;

        let in_range = |created_at: i64| {
            filters
                .date_range
                .is_none_or(|(from, to)| created_at >= from && created_at <= to)
        };

        let conversations: Vec<Conversation> = retrieved
            .conversations
            .into_iter()
            .filter(|c| in_range(c.created_at))
            .collect();
        let tasks: Vec<Task> = retrieved
            .tasks
            .into_iter()
            .filter(|t| in_range(t.created_at))
            .collect();
        let memories: Vec<AgentMemory> = retrieved
            .memories
            .into_iter()
            .filter(|m| in_range(m.created_at))
            .filter(|m| filters.memory_type.is_none_or(|kind| m.memory_type == kind))
            .filter(|m| {
                filters
                    .importance
                    .is_none_or(|range| m.importance >= range.min && m.importance <= range.max)
            })
            .collect();

        let total_results = conversations.len() + memories.len() + tasks.len();
        Ok(ContextSearchResults {
            conversations,
            memories,
            tasks,
            total_results,
        })
    }

    /// Recent activity summary for one agent within a project.
    pub async fn get_agent_context(
        &self,
        agent_id: &str,
        project_id: &str,
        limit: usize,
    ) -> Result<AgentContextSummary> {
        let agent_id = agent_id.to_string();
        let project_id = project_id.to_string();
        self.db
            .interact(move |conn| {
                Ok(AgentContextSummary {
                    conversations: get_conversations_by_agent_sync(
                        conn,
                        &project_id,
                        &agent_id,
                        limit,
                    )?,
                    memories: get_agent_memories_sync(
                        conn,
                        &agent_id,
                        Some(&project_id),
                        INHERIT_MIN_IMPORTANCE,
                        limit,
                    )?,
                    tasks: get_tasks_by_assignee_sync(conn, &project_id, &agent_id, limit)?,
                })
            })
            .await
    }
}
