//! Maps parsed sessions onto the team / agent / conversation model.
//!
//! Per session:
//!
//! | Parsed | Stored |
//! |--------|--------|
//! | session | [`Team`] `{session_id}` |
//! | main log | lead [`Agent`] `{session_id}-lead` and [`Conversation`] `{session_id}-conv` |
//! | sub-agent | teammate [`Agent`] `{agent_id}` and [`Conversation`] `{session_id}-conv-{agent_id}` |
//! | turn | [`Message`] (fresh id every sync) |
//! | tool call / thinking | [`Trace`] `tool.{name}` / `llm_call` |
//!
//! Teams, agents and conversations are upserted. Messages and traces are
//! replaced wholesale per conversation, so syncing the same logs twice leaves
//! the same rows behind.

use crate::config::SyncConfig;
use crate::db::{ReplaceStats, Store};
use crate::error::{Error, Result};
use crate::format::{short_agent_name, truncate_with_suffix};
use crate::ingest::session::{parse_session, scan_sessions};
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// `created_by` of every synced team
pub const TEAM_CREATOR: &str = "claude-code";

const RAW_THOUGHTS_RESULT_LIMIT: usize = 1000;
const TRACE_RESULT_LIMIT: usize = 2000;
const THINKING_PREVIEW_LIMIT: usize = 200;
const TRUNCATED_SUFFIX: &str = "...(truncated)";

/// Outcome of syncing one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionSyncStats {
    /// Conversations written (main plus sub-agents that succeeded)
    pub conversations: usize,
    pub messages_inserted: usize,
    pub traces_inserted: usize,
    /// Rows lost even after row-by-row retry
    pub rows_failed: usize,
    /// Sub-agents skipped because a write failed
    pub subagent_failures: usize,
}

impl SessionSyncStats {
    fn absorb(&mut self, replaced: ReplaceStats) {
        self.conversations += 1;
        self.messages_inserted += replaced.messages_inserted;
        self.traces_inserted += replaced.traces_inserted;
        self.rows_failed += replaced.rows_failed;
    }
}

/// Result of a full scan and sync of a session root.
#[derive(Debug, Default)]
pub struct SyncResult {
    /// Session logs found under the root
    pub sessions_found: usize,
    /// Sessions parsed and written without a fatal error
    pub sessions_synced: usize,
    pub messages_inserted: usize,
    pub traces_inserted: usize,
    /// Failed sessions (session id → error message)
    pub errors: Vec<(String, String)>,
}

/// `running` when the session's last known activity is inside the recency window.
///
/// Exactly `window` old counts as idle.
pub fn team_status(end: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> TeamStatus {
    match end {
        Some(end) if now - end < window => TeamStatus::Running,
        _ => TeamStatus::Idle,
    }
}

/// `active` when the agent's final message has a timestamp inside the recency window.
pub fn agent_status(messages: &[ParsedMessage], now: DateTime<Utc>, window: Duration) -> AgentStatus {
    match messages.last().and_then(|m| m.timestamp) {
        Some(ts) if now - ts < window => AgentStatus::Active,
        _ => AgentStatus::Idle,
    }
}

/// Display name for a sub-agent: its slug, else a shortened id.
pub fn agent_display_name(slug: Option<&str>, agent_id: &str) -> String {
    match slug {
        Some(slug) if !slug.is_empty() => slug.to_string(),
        _ => short_agent_name(agent_id),
    }
}

/// Serializes syncs of the same session.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// The lock guarding `session_id`, created on first use.
    ///
    /// Hand it back through [`release`](Self::release) once done.
    pub fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop `lock` and forget the session's entry when no one else holds it.
    pub fn release(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap();
        drop(lock);
        if locks
            .get(session_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(session_id);
        }
    }

    /// Sessions currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where one conversation's derived rows belong.
struct ConversationTarget<'a> {
    team_id: &'a str,
    conversation_id: &'a str,
    /// Owner of assistant turns that carry no agent id
    default_agent_id: &'a str,
    /// Owner of every trace in the conversation
    trace_agent_id: &'a str,
}

/// Writes parsed sessions into a [`Store`].
pub struct SessionSynchronizer<S: Store> {
    store: Arc<S>,
    config: SyncConfig,
    locks: SessionLocks,
}

impl<S: Store> SessionSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn recency_window(&self) -> Result<Duration> {
        self.config.recency_window().ok_or_else(|| {
            Error::Config(format!(
                "sync.recency_minutes out of range: {}",
                self.config.recency_minutes
            ))
        })
    }

    fn span_placeholder(&self) -> Result<Duration> {
        self.config.span_placeholder().ok_or_else(|| {
            Error::Config(format!(
                "sync.span_placeholder_ms out of range: {}",
                self.config.span_placeholder_ms
            ))
        })
    }

    /// Scan `root` and sync every session found.
    ///
    /// A session that fails is recorded in [`SyncResult::errors`] and the scan
    /// moves on. Only an unreadable root is returned as an error.
    pub fn sync_all(&self, root: &Path) -> Result<SyncResult> {
        self.sync_all_with_progress(root, |_, _, _| {})
    }

    /// [`sync_all`](Self::sync_all) with a callback receiving
    /// `(index, total, session_id)` before each session.
    pub fn sync_all_with_progress<F>(&self, root: &Path, mut on_progress: F) -> Result<SyncResult>
    where
        F: FnMut(usize, usize, &str),
    {
        let sessions = scan_sessions(root)?;
        let mut result = SyncResult {
            sessions_found: sessions.len(),
            ..Default::default()
        };

        tracing::info!(root = %root.display(), sessions = sessions.len(), "Starting full sync");

        for (index, session_id) in sessions.iter().enumerate() {
            on_progress(index, sessions.len(), session_id);
            match self.sync_one(root, session_id) {
                Ok(stats) => {
                    result.sessions_synced += 1;
                    result.messages_inserted += stats.messages_inserted;
                    result.traces_inserted += stats.traces_inserted;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Session sync failed");
                    result.errors.push((session_id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            synced = result.sessions_synced,
            failed = result.errors.len(),
            messages = result.messages_inserted,
            traces = result.traces_inserted,
            "Full sync complete"
        );

        Ok(result)
    }

    /// Parse and sync a single session from `root`.
    pub fn sync_one(&self, root: &Path, session_id: &str) -> Result<SessionSyncStats> {
        let parsed = parse_session(root, session_id)?;
        self.sync_session(&parsed)
    }

    /// Sync a parsed session using the current time for status fields.
    pub fn sync_session(&self, parsed: &ParsedSession) -> Result<SessionSyncStats> {
        self.sync_session_at(parsed, Utc::now())
    }

    /// Sync a parsed session, judging recency against `now`.
    ///
    /// Failures writing the team, the lead agent or the main conversation are
    /// returned. A sub-agent whose writes fail is logged and skipped.
    pub fn sync_session_at(&self, parsed: &ParsedSession, now: DateTime<Utc>) -> Result<SessionSyncStats> {
        let window = self.recency_window()?;
        let span = self.span_placeholder()?;

        let lock = self.locks.lock_for(&parsed.session_id);
        let result = {
            // The guarded value is (), so a poisoned lock is still usable
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.sync_locked(parsed, now, window, span)
        };
        self.locks.release(&parsed.session_id, lock);
        result
    }

    fn sync_locked(
        &self,
        parsed: &ParsedSession,
        now: DateTime<Utc>,
        window: Duration,
        span: Duration,
    ) -> Result<SessionSyncStats> {
        let session_id = parsed.session_id.as_str();
        let started_at = parsed.start.unwrap_or(now);

        tracing::info!(
            session_id,
            slug = %parsed.slug,
            main_messages = parsed.messages.len(),
            subagents = parsed.subagents.len(),
            "Syncing session"
        );

        self.store.upsert_team(&Team {
            id: session_id.to_string(),
            name: parsed.slug.clone(),
            description: format!("Claude Code session: {}", parsed.slug),
            created_by: TEAM_CREATOR.to_string(),
            status: team_status(parsed.end, now, window),
            team_name: parsed.team_name.clone(),
            created_at: started_at,
        })?;

        let lead_id = format!("{}-lead", session_id);
        self.store.upsert_agent(&Agent {
            id: lead_id.clone(),
            team_id: session_id.to_string(),
            role: AgentRole::Lead,
            name: parsed.agent_name.clone().unwrap_or_else(|| parsed.slug.clone()),
            specialty: "Main Claude Code session".to_string(),
            status: agent_status(&parsed.messages, now, window),
            created_at: started_at,
        })?;

        for sub in &parsed.subagents {
            let teammate = Agent {
                id: sub.agent_id.clone(),
                team_id: session_id.to_string(),
                role: AgentRole::Teammate,
                name: agent_display_name(sub.slug.as_deref(), &sub.agent_id),
                specialty: format!("Sub-agent {}", sub.agent_id),
                status: agent_status(&sub.messages, now, window),
                created_at: sub.first_timestamp().unwrap_or(started_at),
            };
            if let Err(e) = self.store.upsert_agent(&teammate) {
                tracing::warn!(session_id, agent_id = %sub.agent_id, error = %e, "Failed to upsert sub-agent");
            }
        }

        let mut stats = SessionSyncStats::default();

        let main_conv_id = format!("{}-conv", session_id);
        self.store.upsert_conversation(&Conversation {
            id: main_conv_id.clone(),
            team_id: session_id.to_string(),
            agent_id: lead_id.clone(),
            title: parsed.slug.clone(),
            started_at,
            ended_at: parsed.end,
        })?;
        let replaced = self.replace(
            &parsed.messages,
            &ConversationTarget {
                team_id: session_id,
                conversation_id: &main_conv_id,
                default_agent_id: &lead_id,
                trace_agent_id: &lead_id,
            },
            now,
            span,
        )?;
        stats.absorb(replaced);

        for sub in &parsed.subagents {
            match self.sync_subagent(parsed, sub, started_at, now, span) {
                Ok(replaced) => stats.absorb(replaced),
                Err(e) => {
                    stats.subagent_failures += 1;
                    tracing::warn!(session_id, agent_id = %sub.agent_id, error = %e, "Skipping sub-agent");
                }
            }
        }

        tracing::info!(
            session_id,
            conversations = stats.conversations,
            messages = stats.messages_inserted,
            traces = stats.traces_inserted,
            rows_failed = stats.rows_failed,
            "Finished syncing session"
        );

        Ok(stats)
    }

    fn sync_subagent(
        &self,
        parsed: &ParsedSession,
        sub: &ParsedAgent,
        session_start: DateTime<Utc>,
        now: DateTime<Utc>,
        span: Duration,
    ) -> Result<ReplaceStats> {
        let conv_id = format!("{}-conv-{}", parsed.session_id, sub.agent_id);
        self.store.upsert_conversation(&Conversation {
            id: conv_id.clone(),
            team_id: parsed.session_id.clone(),
            agent_id: sub.agent_id.clone(),
            title: agent_display_name(sub.slug.as_deref(), &sub.agent_id),
            started_at: sub.first_timestamp().unwrap_or(session_start),
            ended_at: sub.last_timestamp(),
        })?;

        self.replace(
            &sub.messages,
            &ConversationTarget {
                team_id: &parsed.session_id,
                conversation_id: &conv_id,
                default_agent_id: &sub.agent_id,
                trace_agent_id: &sub.agent_id,
            },
            now,
            span,
        )
    }

    fn replace(
        &self,
        messages: &[ParsedMessage],
        target: &ConversationTarget<'_>,
        now: DateTime<Utc>,
        span: Duration,
    ) -> Result<ReplaceStats> {
        let (rows, traces) = build_conversation_rows(messages, target, now, span);
        self.store
            .replace_conversation(target.conversation_id, &rows, &traces, self.config.batch_size)
    }
}

/// Derive the message and trace rows of one conversation.
fn build_conversation_rows(
    messages: &[ParsedMessage],
    target: &ConversationTarget<'_>,
    now: DateTime<Utc>,
    span: Duration,
) -> (Vec<Message>, Vec<Trace>) {
    let mut rows = Vec::new();
    let mut traces = Vec::new();

    for msg in messages {
        let (role, agent_id) = match msg.role {
            // Tool-result carriers and empty prompts have nothing to show
            TurnRole::User if msg.content.is_empty() => continue,
            TurnRole::User => (MessageRole::User, None),
            TurnRole::Assistant => {
                let agent = msg
                    .agent_id
                    .clone()
                    .unwrap_or_else(|| target.default_agent_id.to_string());
                let role = if msg.is_sidechain && msg.agent_id.is_some() {
                    MessageRole::TeammateMessage
                } else {
                    MessageRole::Agent
                };
                (role, Some(agent))
            }
        };

        let created_at = msg.timestamp.unwrap_or(now);
        let raw_thoughts = match role {
            MessageRole::Agent | MessageRole::TeammateMessage => build_raw_thoughts(msg),
            _ => None,
        };

        rows.push(Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: target.conversation_id.to_string(),
            team_id: target.team_id.to_string(),
            agent_id,
            role,
            content: msg.content.clone(),
            raw_thoughts,
            source_uuid: msg.uuid.clone(),
            parent_uuid: msg.parent_uuid.clone(),
            created_at,
        });

        let new_trace = |span_name: String, attributes: serde_json::Value| Trace {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: target.team_id.to_string(),
            agent_id: target.trace_agent_id.to_string(),
            conversation_id: target.conversation_id.to_string(),
            parent_span_id: None,
            span_name,
            attributes,
            start_time: created_at,
            end_time: created_at.checked_add_signed(span),
        };

        for call in &msg.tool_calls {
            let mut attributes = json!({
                "tool_name": call.name,
                "input": call.input,
            });
            if let Some(result) = call.result.as_deref().filter(|r| !r.is_empty()) {
                attributes["result"] =
                    json!(truncate_with_suffix(result, TRACE_RESULT_LIMIT, TRUNCATED_SUFFIX));
            }
            traces.push(new_trace(format!("tool.{}", call.name), attributes));
        }

        if !msg.thinking.is_empty() {
            let mut attributes = json!({
                "thinking_preview": truncate_with_suffix(&msg.thinking, THINKING_PREVIEW_LIMIT, "..."),
            });
            if let Some(usage) = &msg.usage {
                attributes["input_tokens"] = json!(usage.input);
                attributes["output_tokens"] = json!(usage.output);
                attributes["cache_creation"] = json!(usage.cache_creation);
                attributes["cache_read"] = json!(usage.cache_read);
            }
            traces.push(new_trace("llm_call".to_string(), attributes));
        }
    }

    (rows, traces)
}

/// Thinking, tool calls and token usage of an agent turn, or `None` if it has none.
fn build_raw_thoughts(msg: &ParsedMessage) -> Option<serde_json::Value> {
    let mut thoughts = serde_json::Map::new();

    if !msg.thinking.is_empty() {
        thoughts.insert("thinking".to_string(), json!(msg.thinking));
    }

    if !msg.tool_calls.is_empty() {
        let calls: Vec<serde_json::Value> = msg
            .tool_calls
            .iter()
            .map(|call| {
                let mut entry = json!({ "name": call.name, "input": call.input });
                if let Some(result) = call.result.as_deref().filter(|r| !r.is_empty()) {
                    entry["result"] = json!(truncate_with_suffix(
                        result,
                        RAW_THOUGHTS_RESULT_LIMIT,
                        TRUNCATED_SUFFIX
                    ));
                }
                entry
            })
            .collect();
        thoughts.insert("tool_calls".to_string(), json!(calls));
    }

    if let Some(usage) = &msg.usage {
        thoughts.insert(
            "token_usage".to_string(),
            json!({
                "input": usage.input,
                "output": usage.output,
                "cache_creation": usage.cache_creation,
                "cache_read": usage.cache_read,
            }),
        );
    }

    if thoughts.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(thoughts))
    }
}
