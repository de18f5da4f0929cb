// src/types.rs
// Core data model: projects, tasks, conversations, artifact references,
// agent memories, and session state.
//
// All timestamps are integer epoch-millis. Identifiers are opaque strings
// minted with `utils::new_id`. Every entity carries an open-ended metadata
// map (string keys -> JSON values).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Open-ended metadata mapping carried by every entity.
pub type Metadata = BTreeMap<String, Value>;

// ============================================================================
// Tagged variants
// ============================================================================
//
// Closed sum types with an `Unknown` escape hatch so rows written by newer
// schema revisions still load. Stored (and serialized) as snake_case
// strings; parsing never fails, it falls back to `Unknown`.

/// Task lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }

    /// Terminal states require `completed_at` to be set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

/// Author role of a conversation entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationRole {
    User,
    Agent,
    System,
    Unknown,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }
}

impl From<ConversationRole> for String {
    fn from(value: ConversationRole) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for ConversationRole {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

/// Kind of external artifact a reference points at
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactType {
    Specification,
    Premortem,
    Research,
    Code,
    Test,
    Documentation,
    Screenshot,
    Unknown,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }
}

impl From<ArtifactType> for String {
    fn from(value: ArtifactType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for ArtifactType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

/// Kind of learned agent memory
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryType {
    SuccessPattern,
    FailurePattern,
    Optimization,
    Context,
    Unknown,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }
}

impl From<MemoryType> for String {
    fn from(value: MemoryType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for MemoryType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

/// Live-session status tracked in the session cache
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<SessionStatus> for String {
    fn from(value: SessionStatus) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

/// Source table of a full-text search hit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(into = "String", try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    Task,
    Conversation,
    Memory,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or(Self::Unknown)
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for SourceType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&value))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Root of ownership for all other entities.
///
/// Created implicitly on first reference; `last_accessed_at` is refreshed
/// whenever any child entity is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub repository_url: Option<String>,
    pub created_at: i64,
    pub last_accessed_at: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Outcome record embedded in a terminal task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactReference>,
    pub metrics: Option<Metadata>,
}

/// A unit of delegated work.
///
/// Invariant: `completed_at` is set iff `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub princess_id: Option<String>,
    pub drone_id: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One conversation turn. Append-only; never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub role: ConversationRole,
    pub agent_id: Option<String>,
    pub content: String,
    pub created_at: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Metadata record pointing at an external blob.
///
/// At least one of `object_path` / `local_path` / `external_url` must be
/// set. Blob content never enters the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub artifact_type: ArtifactType,
    pub name: String,
    pub object_path: Option<String>,
    pub local_path: Option<String>,
    pub external_url: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A learned pattern recorded after an execution.
///
/// `importance` is a caller-supplied ranking weight in [0, 1];
/// `access_count` and `last_accessed_at` are maintained by retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub access_count: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Live execution session, held in the session cache only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub agent_id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub parent_agent_id: Option<String>,
    pub status: SessionStatus,
    pub start_time: i64,
    pub last_activity: i64,
    pub thought_count: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Per-execution context handed to the integration layer by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: String,
    pub agent_id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub parent_agent_id: Option<String>,
    pub start_time: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One full-text search hit. Higher `score` is more relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub source_id: String,
    pub source_type: SourceType,
    pub content: String,
    pub score: f64,
}
