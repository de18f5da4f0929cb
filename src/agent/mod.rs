// src/agent/mod.rs
// Agent context integration: the lifecycle wrapper around one execution
//
// An execution opens a session in the cache, records its conversation
// turns and result in the primary store, and closes the session on
// finalize. Session-cache writes are best-effort throughout: a lost cache
// never aborts the agent's execution. Conversation writes likewise
// degrade to warnings; project and task state propagate errors.

use crate::cache::SessionCache;
use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::retrieval::{ContextRetriever, RetrievalFilter, RetrievedContext};
use crate::types::{
    AgentMemory, Conversation, ConversationRole, ExecutionContext, MemoryType, Metadata,
    SessionState, SessionStatus, Task, TaskResult, TaskStatus,
};
use crate::utils::{new_id, now_millis, truncate};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Cap on result text mirrored into the outcome conversation.
const RESULT_SUMMARY_MAX: usize = 500;

/// Hands out strictly increasing timestamps for conversation writes.
///
/// Turns issued within the same millisecond advance by 1ms so per-session
/// conversation order is total.
struct ConversationClock {
    last: Mutex<i64>,
}

impl ConversationClock {
    fn new() -> Self {
        Self { last: Mutex::new(0) }
    }

    fn next(&self) -> i64 {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let next = now_millis().max(*last + 1);
        *last = next;
        next
    }
}

/// Request to record a learned memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub agent_id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    pub metadata: Metadata,
}

/// Outcome of `store_agent_result`. Failures are carried here, not raised.
#[derive(Debug, Clone)]
pub struct AgentResultOutcome {
    pub success: bool,
    pub context_id: String,
    pub performance_millis: u64,
    pub error: Option<String>,
}

/// End-to-end persistence for one agent execution.
pub struct AgentContext {
    db: Arc<DatabasePool>,
    cache: Arc<SessionCache>,
    retriever: ContextRetriever,
    clock: ConversationClock,
}

impl AgentContext {
    pub fn new(db: Arc<DatabasePool>, cache: Arc<SessionCache>) -> Self {
        let retriever = ContextRetriever::new(db.clone());
        Self {
            db,
            cache,
            retriever,
            clock: ConversationClock::new(),
        }
    }

    /// Open the session and seed durable state.
    ///
    /// Creates the cache session (best-effort), ensures the project and an
    /// optional task stub exist, and records the opening system turn.
    pub async fn initialize_context(&self, ctx: &ExecutionContext) -> Result<()> {
        let session = SessionState {
            session_id: ctx.session_id.clone(),
            agent_id: ctx.agent_id.clone(),
            project_id: ctx.project_id.clone(),
            task_id: ctx.task_id.clone(),
            parent_agent_id: ctx.parent_agent_id.clone(),
            status: SessionStatus::Active,
            start_time: ctx.start_time,
            last_activity: now_millis(),
            thought_count: 0,
            metadata: ctx.metadata.clone(),
        };
        if let Err(e) = self.cache.create_session(&session).await {
            tracing::warn!(session_id = %ctx.session_id, "session cache write skipped: {}", e);
        }

        let project_id = ctx.project_id.clone();
        let task_id = ctx.task_id.clone();
        let now = now_millis();
        self.db
            .interact(move |conn| {
                db::ensure_project_sync(conn, &project_id, now)?;
                if let Some(task_id) = task_id.as_deref()
                    && db::get_task_sync(conn, task_id)?.is_none()
                {
                    let stub = Task {
                        id: task_id.to_string(),
                        project_id: project_id.clone(),
                        description: format!("task {task_id}"),
                        status: TaskStatus::Pending,
                        assigned_to: None,
                        princess_id: None,
                        drone_id: None,
                        created_at: now,
                        completed_at: None,
                        result: None,
                        metadata: Metadata::default(),
                    };
                    db::save_task_sync(conn, &stub)?;
                }
                Ok(())
            })
            .await?;

        self.record_conversation(
            ctx,
            ConversationRole::System,
            format!("{} session started", ctx.agent_id),
            Metadata::default(),
        )
        .await;
        Ok(())
    }

    /// Record one reasoning step.
    pub async fn store_agent_thought(
        &self,
        ctx: &ExecutionContext,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        if let Err(e) = self.cache.update_activity(&ctx.session_id).await {
            tracing::warn!(session_id = %ctx.session_id, "activity update skipped: {}", e);
        }
        self.record_conversation(
            ctx,
            ConversationRole::Agent,
            content.to_string(),
            metadata.unwrap_or_default(),
        )
        .await;
        Ok(())
    }

    /// Persist the execution's result onto its task and conversation log.
    ///
    /// Never raises: a failed write comes back as `success = false`.
    pub async fn store_agent_result(
        &self,
        ctx: &ExecutionContext,
        result: TaskResult,
    ) -> AgentResultOutcome {
        let started = std::time::Instant::now();
        let outcome = self.store_result_inner(ctx, &result).await;

        AgentResultOutcome {
            success: outcome.is_ok(),
            context_id: ctx.session_id.clone(),
            performance_millis: started.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    async fn store_result_inner(&self, ctx: &ExecutionContext, result: &TaskResult) -> Result<()> {
        if let Some(task_id) = ctx.task_id.clone() {
            let result = result.clone();
            let now = now_millis();
            self.db
                .interact(move |conn| {
                    let Some(mut task) = db::get_task_sync(conn, &task_id)? else {
                        return Err(crate::error::ContextError::NotFound(format!(
                            "task {task_id}"
                        )));
                    };
                    task.status = if result.success {
                        TaskStatus::Completed
                    } else {
                        TaskStatus::Failed
                    };
                    task.completed_at = Some(now.max(task.created_at));
                    task.result = Some(result);
                    db::save_task_sync(conn, &task)
                })
                .await?;
        }

        let summary = match (&result.output, &result.error) {
            (Some(output), _) if result.success => {
                format!("{} finished: {}", ctx.agent_id, truncate(output, RESULT_SUMMARY_MAX))
            }
            (_, Some(error)) => {
                format!("{} failed: {}", ctx.agent_id, truncate(error, RESULT_SUMMARY_MAX))
            }
            _ if result.success => format!("{} finished", ctx.agent_id),
            _ => format!("{} failed", ctx.agent_id),
        };
        let mut metadata = Metadata::default();
        metadata.insert("result_success".to_string(), json!(result.success));
        self.record_conversation(ctx, ConversationRole::Agent, summary, metadata)
            .await;
        Ok(())
    }

    /// Relevance-ranked context for the query. Delegates to retrieval.
    pub async fn retrieve_context(
        &self,
        query: &str,
        filter: &RetrievalFilter,
    ) -> Result<RetrievedContext> {
        self.retriever.retrieve_context(query, filter).await
    }

    /// Record a learned memory with fresh id, timestamps, and zero access
    /// count.
    pub async fn store_agent_memory(&self, new: NewMemory) -> Result<AgentMemory> {
        let now = now_millis();
        let memory = AgentMemory {
            id: new_id(),
            agent_id: new.agent_id,
            project_id: new.project_id,
            task_id: new.task_id,
            memory_type: new.memory_type,
            content: new.content,
            importance: new.importance,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: new.metadata,
        };

        let to_save = memory.clone();
        self.db
            .interact(move |conn| {
                db::ensure_project_sync(conn, &to_save.project_id, now)?;
                db::save_agent_memory_sync(conn, &to_save)
            })
            .await?;
        Ok(memory)
    }

    /// Close the session and record the closing system turn.
    pub async fn finalize_context(&self, ctx: &ExecutionContext, success: bool) -> Result<()> {
        if let Err(e) = self.cache.complete_session(&ctx.session_id, success).await {
            tracing::warn!(session_id = %ctx.session_id, "session close skipped: {}", e);
        }

        let duration_millis = now_millis() - ctx.start_time;
        let mut metadata = Metadata::default();
        metadata.insert("duration_millis".to_string(), json!(duration_millis));
        metadata.insert("success".to_string(), json!(success));
        self.record_conversation(
            ctx,
            ConversationRole::System,
            format!("{} session ended", ctx.agent_id),
            metadata,
        )
        .await;
        Ok(())
    }

    /// Run `f` inside a persisted execution: initialize, run, finalize.
    ///
    /// On error the failure is recorded as the execution's result, the
    /// session finalizes unsuccessfully, and the error is re-raised.
    pub async fn with_context_persistence<F, Fut, T>(
        &self,
        ctx: &ExecutionContext,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.initialize_context(ctx).await?;
        match f().await {
            Ok(value) => {
                self.finalize_context(ctx, true).await?;
                Ok(value)
            }
            Err(e) => {
                let failure = TaskResult {
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    artifacts: Vec::new(),
                    metrics: None,
                };
                self.store_agent_result(ctx, failure).await;
                self.finalize_context(ctx, false).await?;
                Err(e)
            }
        }
    }

    /// Best-effort conversation write with a strictly increasing timestamp.
    /// A turn that fails to persist is a warning, not a failure.
    async fn record_conversation(
        &self,
        ctx: &ExecutionContext,
        role: ConversationRole,
        content: String,
        metadata: Metadata,
    ) {
        let conversation = Conversation {
            id: new_id(),
            project_id: ctx.project_id.clone(),
            task_id: ctx.task_id.clone(),
            role,
            agent_id: Some(ctx.agent_id.clone()),
            content,
            created_at: self.clock.next(),
            metadata,
        };
        self.db
            .try_interact_warn("conversation write", move |conn| {
                db::save_conversation_sync(conn, &conversation)
            })
            .await;
    }
}
