// src/retrieval/mod.rs
// Memory retrieval: one query in, a mixed ranked result set out
//
// A retrieval searches the FTS index, partitions hits by source type,
// reconstructs the full entities, and reports a single relevance score:
// the weighted average of the top-5 hit scores. Returned memories have
// their access accounting bumped.

use crate::db::{
    self, DatabasePool, SearchQuery, get_agent_memories_sync, get_conversation_sync,
    get_memory_sync, get_task_sync,
};
use crate::error::{ContextError, Result};
use crate::types::{
    AgentMemory, Conversation, MemoryType, SearchHit, SourceType, Task,
};
use crate::utils::now_millis;
use std::sync::Arc;
use std::time::Instant;

/// Weights applied to the top-5 hit scores, best hit first.
const RELEVANCE_WEIGHTS: [f64; 5] = [1.0, 0.8, 0.6, 0.4, 0.2];

/// Default result bound when the caller does not supply one.
const DEFAULT_LIMIT: usize = 20;

/// Importance floor for success-pattern retrieval.
const SUCCESS_PATTERN_MIN_IMPORTANCE: f64 = 0.7;
/// Importance floor for failure-pattern retrieval.
const FAILURE_PATTERN_MIN_IMPORTANCE: f64 = 0.5;

/// Scoping options for a retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    /// When set, returned memories are restricted to this agent.
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

/// Mixed result set for one retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
    pub tasks: Vec<Task>,
    pub relevance_score: f64,
    pub retrieval_millis: u64,
}

/// Everything recorded about one task: the task itself, its conversation
/// thread, and the assignee's high-importance memories.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: Task,
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
}

/// Weighted average of the top-5 scores. Empty input scores zero; a single
/// hit scores as itself.
fn relevance_score(hits: &[SearchHit]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (hit, weight) in hits.iter().zip(RELEVANCE_WEIGHTS) {
        weighted += hit.score * weight;
        weight_sum += weight;
    }
    weighted / weight_sum
}

/// Relevance-ranked context retrieval over the primary store.
#[derive(Clone)]
pub struct ContextRetriever {
    db: Arc<DatabasePool>,
}

impl ContextRetriever {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        Self { db }
    }

    /// Search and assemble a mixed result set for one query.
    pub async fn retrieve_context(
        &self,
        query: &str,
        filter: &RetrievalFilter,
    ) -> Result<RetrievedContext> {
        let started = Instant::now();
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);

        if query.trim().is_empty() || limit == 0 {
            return Ok(RetrievedContext {
                retrieval_millis: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        let search = SearchQuery {
            query: query.to_string(),
            project_id: filter.project_id.clone(),
            task_id: filter.task_id.clone(),
            limit,
        };
        let agent_id = filter.agent_id.clone();

        let (hits, conversations, memories, tasks) = self
            .db
            .interact(move |conn| {
                let hits = db::search_sync(conn, &search)?;

                let mut conversations = Vec::new();
                let mut memories = Vec::new();
                let mut tasks = Vec::new();
                for hit in &hits {
                    match hit.source_type {
                        SourceType::Conversation => {
                            if let Some(c) = get_conversation_sync(conn, &hit.source_id)? {
                                conversations.push(c);
                            }
                        }
                        SourceType::Memory => {
                            if let Some(m) = get_memory_sync(conn, &hit.source_id)? {
                                let matches_agent = agent_id
                                    .as_deref()
                                    .is_none_or(|agent| m.agent_id == agent);
                                if matches_agent {
                                    memories.push(m);
                                }
                            }
                        }
                        SourceType::Task => {
                            if let Some(t) = get_task_sync(conn, &hit.source_id)? {
                                tasks.push(t);
                            }
                        }
                        SourceType::Unknown => {}
                    }
                }

                let memory_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
                db::touch_memories_sync(conn, &memory_ids, now_millis())?;

                Ok((hits, conversations, memories, tasks))
            })
            .await?;

        Ok(RetrievedContext {
            conversations,
            memories,
            tasks,
            relevance_score: relevance_score(&hits),
            retrieval_millis: started.elapsed().as_millis() as u64,
        })
    }

    /// Tasks similar to the given one: search its description within its
    /// project, excluding the task itself.
    pub async fn get_similar_tasks(&self, task: &Task, limit: usize) -> Result<Vec<Task>> {
        let search = SearchQuery {
            query: task.description.clone(),
            project_id: Some(task.project_id.clone()),
            task_id: None,
            // One extra slot in case the task matches itself (it usually does)
            limit: limit + 1,
        };
        let exclude = task.id.clone();

        self.db
            .interact(move |conn| {
                let hits = db::search_sync(conn, &search)?;
                let mut tasks = Vec::new();
                for hit in hits {
                    if hit.source_type == SourceType::Task && hit.source_id != exclude {
                        if let Some(t) = get_task_sync(conn, &hit.source_id)? {
                            tasks.push(t);
                        }
                    }
                    if tasks.len() >= limit {
                        break;
                    }
                }
                Ok(tasks)
            })
            .await
    }

    /// High-importance success patterns for an agent.
    pub async fn get_success_patterns(
        &self,
        agent_id: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentMemory>> {
        self.get_patterns(
            agent_id,
            project_id,
            MemoryType::SuccessPattern,
            SUCCESS_PATTERN_MIN_IMPORTANCE,
            limit,
        )
        .await
    }

    /// Failure patterns for an agent (lower importance floor: knowing what
    /// went wrong is useful earlier).
    pub async fn get_failure_patterns(
        &self,
        agent_id: &str,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentMemory>> {
        self.get_patterns(
            agent_id,
            project_id,
            MemoryType::FailurePattern,
            FAILURE_PATTERN_MIN_IMPORTANCE,
            limit,
        )
        .await
    }

    async fn get_patterns(
        &self,
        agent_id: &str,
        project_id: Option<&str>,
        memory_type: MemoryType,
        min_importance: f64,
        limit: usize,
    ) -> Result<Vec<AgentMemory>> {
        let agent_id = agent_id.to_string();
        let project_id = project_id.map(str::to_string);
        self.db
            .interact(move |conn| {
                db::get_agent_memories_by_type_sync(
                    conn,
                    &agent_id,
                    project_id.as_deref(),
                    memory_type,
                    min_importance,
                    limit,
                )
            })
            .await
    }

    /// Assemble the full context of one task.
    pub async fn get_task_context(&self, task_id: &str) -> Result<TaskContext> {
        let id = task_id.to_string();
        self.db
            .interact(move |conn| {
                let task = get_task_sync(conn, &id)?
                    .ok_or_else(|| ContextError::NotFound(format!("task {id}")))?;

                let conversations = db::get_conversations_for_task_sync(conn, &id, 100)?;

                let memories = match task.assigned_to.as_deref() {
                    Some(assignee) => get_agent_memories_sync(
                        conn,
                        assignee,
                        Some(&task.project_id),
                        SUCCESS_PATTERN_MIN_IMPORTANCE,
                        10,
                    )?,
                    None => Vec::new(),
                };

                Ok(TaskContext {
                    task,
                    conversations,
                    memories,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_pool;
    use crate::db::{save_conversation_sync, save_task_sync};
    use crate::types::{ConversationRole, TaskStatus};

    fn hit(score: f64) -> SearchHit {
        SearchHit {
            source_id: "x".to_string(),
            source_type: SourceType::Conversation,
            content: String::new(),
            score,
        }
    }

    #[test]
    fn test_relevance_empty_is_zero() {
        assert_eq!(relevance_score(&[]), 0.0);
    }

    #[test]
    fn test_relevance_single_hit_is_its_score() {
        let hits = [hit(2.5)];
        assert!((relevance_score(&hits) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_weighted_average() {
        let hits = [hit(1.0), hit(0.5)];
        // (1.0*1.0 + 0.5*0.8) / (1.0 + 0.8)
        let expected = 1.4 / 1.8;
        assert!((relevance_score(&hits) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_ignores_hits_beyond_top_five() {
        let five = vec![hit(1.0); 5];
        let mut seven = five.clone();
        seven.push(hit(100.0));
        seven.push(hit(100.0));
        assert_eq!(relevance_score(&five), relevance_score(&seven));
    }

    async fn seed_conversation(
        db: &Arc<DatabasePool>,
        id: &str,
        content: &str,
    ) {
        let conversation = Conversation {
            id: id.to_string(),
            project_id: "p1".to_string(),
            task_id: None,
            role: ConversationRole::Agent,
            agent_id: Some("queen".to_string()),
            content: content.to_string(),
            created_at: now_millis(),
            metadata: Default::default(),
        };
        db.interact(move |conn| {
            crate::db::ensure_project_sync(conn, "p1", now_millis())?;
            save_conversation_sync(conn, &conversation)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_ranks_matching_conversation_first() {
        let db = setup_test_pool().await;
        seed_conversation(&db, "c1", "implement OAuth2 login").await;
        seed_conversation(&db, "c2", "update CSS").await;

        let retriever = ContextRetriever::new(db);
        let filter = RetrievalFilter {
            project_id: Some("p1".to_string()),
            limit: Some(10),
            ..Default::default()
        };
        let context = retriever.retrieve_context("OAuth2", &filter).await.unwrap();

        assert_eq!(context.conversations.len(), 1);
        assert_eq!(context.conversations[0].id, "c1");
        assert!(context.relevance_score > 0.0);
        assert!(context.memories.is_empty());
        assert!(context.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_returns_zero_relevance() {
        let db = setup_test_pool().await;
        seed_conversation(&db, "c1", "anything at all").await;

        let retriever = ContextRetriever::new(db);
        let context = retriever
            .retrieve_context("", &RetrievalFilter::default())
            .await
            .unwrap();

        assert_eq!(context.relevance_score, 0.0);
        assert!(context.conversations.is_empty());
        assert!(context.memories.is_empty());
        assert!(context.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_touches_returned_memories() {
        let db = setup_test_pool().await;
        db.interact(|conn| {
            crate::db::ensure_project_sync(conn, "p1", now_millis())?;
            let memory = AgentMemory {
                id: "m1".to_string(),
                agent_id: "queen".to_string(),
                project_id: "p1".to_string(),
                task_id: None,
                memory_type: MemoryType::Optimization,
                content: "batch the writes".to_string(),
                importance: 0.9,
                created_at: now_millis(),
                last_accessed_at: now_millis(),
                access_count: 0,
                metadata: Default::default(),
            };
            crate::db::save_agent_memory_sync(conn, &memory)
        })
        .await
        .unwrap();

        let retriever = ContextRetriever::new(db.clone());
        let filter = RetrievalFilter {
            project_id: Some("p1".to_string()),
            ..Default::default()
        };
        let context = retriever.retrieve_context("batch", &filter).await.unwrap();
        assert_eq!(context.memories.len(), 1);

        let touched = db
            .interact(|conn| crate::db::get_memory_sync(conn, "m1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.access_count, 1);
    }

    #[tokio::test]
    async fn test_similar_tasks_excludes_self() {
        let db = setup_test_pool().await;
        let (t1, _t2) = db
            .interact(|conn| {
                crate::db::ensure_project_sync(conn, "p1", now_millis())?;
                let make = |id: &str, desc: &str| Task {
                    id: id.to_string(),
                    project_id: "p1".to_string(),
                    description: desc.to_string(),
                    status: TaskStatus::Pending,
                    assigned_to: None,
                    princess_id: None,
                    drone_id: None,
                    created_at: now_millis(),
                    completed_at: None,
                    result: None,
                    metadata: Default::default(),
                };
                let t1 = make("t1", "migrate the login flow");
                let t2 = make("t2", "migrate the signup flow");
                save_task_sync(conn, &t1)?;
                save_task_sync(conn, &t2)?;
                Ok((t1, t2))
            })
            .await
            .unwrap();

        let retriever = ContextRetriever::new(db);
        let similar = retriever.get_similar_tasks(&t1, 5).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, "t2");
    }

    #[tokio::test]
    async fn test_pattern_helpers_filter_by_type_and_floor() {
        let db = setup_test_pool().await;
        db.interact(|conn| {
            crate::db::ensure_project_sync(conn, "p1", now_millis())?;
            for (id, memory_type, importance) in [
                ("m1", MemoryType::SuccessPattern, 0.9),
                ("m2", MemoryType::SuccessPattern, 0.6), // below success floor
                ("m3", MemoryType::FailurePattern, 0.6),
                ("m4", MemoryType::Optimization, 0.95),
            ] {
                let now = now_millis();
                crate::db::save_agent_memory_sync(
                    conn,
                    &AgentMemory {
                        id: id.to_string(),
                        agent_id: "queen".to_string(),
                        project_id: "p1".to_string(),
                        task_id: None,
                        memory_type,
                        content: format!("pattern {id}"),
                        importance,
                        created_at: now,
                        last_accessed_at: now,
                        access_count: 0,
                        metadata: Default::default(),
                    },
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();

        let retriever = ContextRetriever::new(db);

        let successes = retriever
            .get_success_patterns("queen", Some("p1"), 10)
            .await
            .unwrap();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].id, "m1");

        let failures = retriever
            .get_failure_patterns("queen", Some("p1"), 10)
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "m3");
    }

    #[tokio::test]
    async fn test_patterns_found_behind_a_crowd_of_other_kinds() {
        let db = setup_test_pool().await;
        db.interact(|conn| {
            crate::db::ensure_project_sync(conn, "p1", now_millis())?;
            // Many high-importance memories of other kinds must not push
            // the qualifying pattern out of the result window
            let now = now_millis();
            let seed = |id: &str, memory_type, importance| {
                crate::db::save_agent_memory_sync(
                    conn,
                    &AgentMemory {
                        id: id.to_string(),
                        agent_id: "queen".to_string(),
                        project_id: "p1".to_string(),
                        task_id: None,
                        memory_type,
                        content: format!("memory {id}"),
                        importance,
                        created_at: now,
                        last_accessed_at: now,
                        access_count: 0,
                        metadata: Default::default(),
                    },
                )
            };
            for i in 0..30 {
                seed(&format!("ctx{i}"), MemoryType::Context, 0.99)?;
            }
            seed("m1", MemoryType::SuccessPattern, 0.75)?;
            Ok(())
        })
        .await
        .unwrap();

        let retriever = ContextRetriever::new(db);
        let successes = retriever
            .get_success_patterns("queen", Some("p1"), 5)
            .await
            .unwrap();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].id, "m1");
    }

    #[tokio::test]
    async fn test_task_context_missing_task_is_not_found() {
        let db = setup_test_pool().await;
        let retriever = ContextRetriever::new(db);
        let err = retriever.get_task_context("ghost").await.unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }
}
