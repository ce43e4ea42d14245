//! Core domain types for crewlog
//!
//! Two families of types live here:
//!
//! - **Parsed** types ([`ParsedMessage`], [`ParsedAgent`], [`ParsedSession`]) are
//!   rebuilt from the log files on every parse and never stored directly.
//! - **Entity** types ([`Team`], [`Agent`], [`Conversation`], [`Message`], [`Trace`])
//!   are the normalized records the [`Store`](crate::db::Store) persists.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One run of the agent runtime, backed by `{session_id}.jsonl` |
//! | **Sub-agent** | A nested agent spawned by the session, backed by `{session_id}/subagents/*.jsonl` |
//! | **Team** | The stored form of a session |
//! | **Lead** | The agent that drives the main session log |
//! | **Teammate** | The stored form of a sub-agent |
//! | **Trace** | A span synthesized from a tool call or a thinking block |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Parsed log content
// ============================================

/// Role of a turn as written in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            _ => Err(format!("unknown turn role: {}", s)),
        }
    }
}

/// A tool invocation made by an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool-use id, the correlation key for results
    pub id: String,
    /// Tool name (Bash, Read, Edit, ...)
    pub name: String,
    /// Tool input as written by the model
    pub input: serde_json::Value,
    /// Result text, filled in once a matching tool result is seen in the same file
    pub result: Option<String>,
}

/// Token accounting for one assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
    pub cache_creation: i64,
    pub cache_read: i64,
}

/// One user or assistant turn decoded from a log line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub uuid: Option<String>,
    pub parent_uuid: Option<String>,
    pub role: TurnRole,
    /// Visible text
    pub content: String,
    /// Thinking fragments, joined by a blank line
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    /// Tool results carried by this turn, keyed by tool-use id
    pub tool_results: HashMap<String, String>,
    pub usage: Option<TokenUsage>,
    /// `None` when the log timestamp was absent or unreadable
    pub timestamp: Option<DateTime<Utc>>,
    /// Owning agent id; `None` for the main session
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub slug: Option<String>,
    pub team_name: Option<String>,
    pub agent_name: Option<String>,
}

impl ParsedMessage {
    /// An empty turn with the given role.
    pub fn new(role: TurnRole) -> Self {
        Self {
            uuid: None,
            parent_uuid: None,
            role,
            content: String::new(),
            thinking: String::new(),
            tool_calls: Vec::new(),
            tool_results: HashMap::new(),
            usage: None,
            timestamp: None,
            agent_id: None,
            is_sidechain: false,
            slug: None,
            team_name: None,
            agent_name: None,
        }
    }
}

/// A sub-agent and its messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAgent {
    pub agent_id: String,
    pub slug: Option<String>,
    pub messages: Vec<ParsedMessage>,
}

impl ParsedAgent {
    /// First known timestamp among this agent's messages.
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().find_map(|m| m.timestamp)
    }

    /// Timestamp of the final message, if it has one.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.last().and_then(|m| m.timestamp)
    }
}

/// A fully parsed session: main log plus sub-agent logs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSession {
    pub session_id: String,
    /// Display slug, synthesized from the id when the log carries none
    pub slug: String,
    pub team_name: Option<String>,
    pub agent_name: Option<String>,
    pub messages: Vec<ParsedMessage>,
    pub subagents: Vec<ParsedAgent>,
    /// Earliest known timestamp across all files
    pub start: Option<DateTime<Utc>>,
    /// Latest known timestamp across all files
    pub end: Option<DateTime<Utc>>,
}

// ============================================
// Team
// ============================================

/// Team activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    /// Log written to within the recency window
    Running,
    /// No recent writes
    Idle,
    /// Explicitly stopped (never set by the synchronizer)
    Stopped,
}

impl TeamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamStatus::Running => "running",
            TeamStatus::Idle => "idle",
            TeamStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for TeamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TeamStatus::Running),
            "idle" => Ok(TeamStatus::Idle),
            "stopped" => Ok(TeamStatus::Stopped),
            _ => Err(format!("unknown team status: {}", s)),
        }
    }
}

/// One team per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Session id
    pub id: String,
    pub name: String,
    pub description: String,
    /// Set on insert only
    pub created_by: String,
    pub status: TeamStatus,
    /// Runtime team grouping name, when the log carries one
    pub team_name: Option<String>,
    /// Set on insert only
    pub created_at: DateTime<Utc>,
}

// ============================================
// Agent
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Lead,
    Teammate,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Lead => "lead",
            AgentRole::Teammate => "teammate",
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(AgentRole::Lead),
            "teammate" => Ok(AgentRole::Teammate),
            _ => Err(format!("unknown agent role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "error" => Ok(AgentStatus::Error),
            _ => Err(format!("unknown agent status: {}", s)),
        }
    }
}

/// Lead of a session or one of its teammates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub team_id: String,
    pub role: AgentRole,
    pub name: String,
    pub specialty: String,
    pub status: AgentStatus,
    /// Set on insert only
    pub created_at: DateTime<Utc>,
}

// ============================================
// Conversation
// ============================================

/// Ordered message stream of one agent within a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub team_id: String,
    pub agent_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================
// Message
// ============================================

/// Stored message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
    /// Sidechain turn attributed to a specific teammate
    TeammateMessage,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
            MessageRole::TeammateMessage => "teammate_message",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "agent" => Ok(MessageRole::Agent),
            "system" => Ok(MessageRole::System),
            "teammate_message" => Ok(MessageRole::TeammateMessage),
            _ => Err(format!("unknown message role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Fresh UUID on every sync
    pub id: String,
    pub conversation_id: String,
    pub team_id: String,
    pub agent_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    /// Thinking, tool calls and token usage of an agent turn
    pub raw_thoughts: Option<serde_json::Value>,
    /// UUID of the log record this message came from
    pub source_uuid: Option<String>,
    pub parent_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Trace
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Fresh UUID on every sync
    pub id: String,
    pub team_id: String,
    pub agent_id: String,
    pub conversation_id: String,
    pub parent_span_id: Option<String>,
    pub span_name: String,
    pub attributes: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A trace with its child spans, as returned by
/// [`Database::conversation_trace_tree`](crate::db::Database::conversation_trace_tree).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceNode {
    #[serde(flatten)]
    pub trace: Trace,
    pub children: Vec<TraceNode>,
}
