//! SQLite repository for the team / agent / conversation model

use super::store::Store;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Database handle (single connection guarded by a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Team queries
    // ============================================

    pub fn get_team(&self, id: &str) -> Result<Option<Team>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM teams WHERE id = ?", [id], Self::row_to_team)
            .optional()
            .map_err(Error::from)
    }

    /// All teams, most recently created first
    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM teams ORDER BY created_at DESC")?;
        let teams = stmt
            .query_map([], Self::row_to_team)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    fn row_to_team(row: &Row) -> rusqlite::Result<Team> {
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Team {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_by: row.get("created_by")?,
            status: status_str.parse().unwrap_or(TeamStatus::Idle),
            team_name: row.get("team_name")?,
            created_at: parse_ts(&created_at_str),
        })
    }

    // ============================================
    // Agent queries
    // ============================================

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM agents WHERE id = ?", [id], Self::row_to_agent)
            .optional()
            .map_err(Error::from)
    }

    /// Agents of a team, lead first
    pub fn list_team_agents(&self, team_id: &str) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM agents WHERE team_id = ?
             ORDER BY CASE role WHEN 'lead' THEN 0 ELSE 1 END, created_at ASC, id ASC",
        )?;
        let agents = stmt
            .query_map([team_id], Self::row_to_agent)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(agents)
    }

    fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
        let role_str: String = row.get("role")?;
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Agent {
            id: row.get("id")?,
            team_id: row.get("team_id")?,
            role: role_str.parse().unwrap_or(AgentRole::Teammate),
            name: row.get("name")?,
            specialty: row.get("specialty")?,
            status: status_str.parse().unwrap_or(AgentStatus::Idle),
            created_at: parse_ts(&created_at_str),
        })
    }

    // ============================================
    // Conversation queries
    // ============================================

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM conversations WHERE id = ?",
            [id],
            Self::row_to_conversation,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list_team_conversations(&self, team_id: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM conversations WHERE team_id = ? ORDER BY started_at ASC, id ASC",
        )?;
        let conversations = stmt
            .query_map([team_id], Self::row_to_conversation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
        let started_at_str: String = row.get("started_at")?;
        let ended_at_str: Option<String> = row.get("ended_at")?;

        Ok(Conversation {
            id: row.get("id")?,
            team_id: row.get("team_id")?,
            agent_id: row.get("agent_id")?,
            title: row.get("title")?,
            started_at: parse_ts(&started_at_str),
            ended_at: parse_ts_opt(ended_at_str),
        })
    }

    // ============================================
    // Message queries
    // ============================================

    /// Messages of a conversation in log order
    pub fn list_conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )?;
        let messages = stmt
            .query_map([conversation_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn count_conversation_messages(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let role_str: String = row.get("role")?;
        let raw_thoughts_str: Option<String> = row.get("raw_thoughts")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Message {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            team_id: row.get("team_id")?,
            agent_id: row.get("agent_id")?,
            role: role_str.parse().unwrap_or(MessageRole::System),
            content: row.get("content")?,
            raw_thoughts: raw_thoughts_str.and_then(|s| serde_json::from_str(&s).ok()),
            source_uuid: row.get("source_uuid")?,
            parent_uuid: row.get("parent_uuid")?,
            created_at: parse_ts(&created_at_str),
        })
    }

    fn insert_message_with(conn: &Connection, message: &Message) -> rusqlite::Result<usize> {
        conn.execute(
            r#"
            INSERT INTO messages (id, conversation_id, team_id, agent_id, role, content,
                                  raw_thoughts, source_uuid, parent_uuid, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                message.id,
                message.conversation_id,
                message.team_id,
                message.agent_id,
                message.role.as_str(),
                message.content,
                message.raw_thoughts.as_ref().map(|v| v.to_string()),
                message.source_uuid,
                message.parent_uuid,
                message.created_at.to_rfc3339(),
            ],
        )
    }

    // ============================================
    // Trace queries
    // ============================================

    /// Traces of a conversation ordered by start time
    pub fn list_conversation_traces(&self, conversation_id: &str) -> Result<Vec<Trace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM traces WHERE conversation_id = ? ORDER BY start_time ASC, rowid ASC",
        )?;
        let traces = stmt
            .query_map([conversation_id], Self::row_to_trace)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(traces)
    }

    pub fn count_conversation_traces(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM traces WHERE conversation_id = ?",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Root spans of a conversation (no parent) with their descendants nested.
    ///
    /// Roots and children are each ordered by start time.
    pub fn conversation_trace_tree(&self, conversation_id: &str) -> Result<Vec<TraceNode>> {
        let traces = self.list_conversation_traces(conversation_id)?;

        let mut children: HashMap<String, Vec<Trace>> = HashMap::new();
        let mut roots = Vec::new();
        for trace in traces {
            match trace.parent_span_id.clone() {
                Some(parent) => children.entry(parent).or_default().push(trace),
                None => roots.push(trace),
            }
        }

        fn build(trace: Trace, children: &mut HashMap<String, Vec<Trace>>) -> TraceNode {
            let kids = children.remove(&trace.id).unwrap_or_default();
            TraceNode {
                children: kids.into_iter().map(|t| build(t, children)).collect(),
                trace,
            }
        }

        Ok(roots
            .into_iter()
            .map(|t| build(t, &mut children))
            .collect())
    }

    /// Close an open span. Returns false when no trace has this id.
    pub fn end_trace(&self, trace_id: &str, end_time: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE traces SET end_time = ?1 WHERE id = ?2",
            params![end_time.to_rfc3339(), trace_id],
        )?;
        Ok(updated > 0)
    }

    fn row_to_trace(row: &Row) -> rusqlite::Result<Trace> {
        let attributes_str: String = row.get("attributes")?;
        let start_time_str: String = row.get("start_time")?;
        let end_time_str: Option<String> = row.get("end_time")?;

        Ok(Trace {
            id: row.get("id")?,
            team_id: row.get("team_id")?,
            agent_id: row.get("agent_id")?,
            conversation_id: row.get("conversation_id")?,
            parent_span_id: row.get("parent_span_id")?,
            span_name: row.get("span_name")?,
            attributes: serde_json::from_str(&attributes_str).unwrap_or(serde_json::json!({})),
            start_time: parse_ts(&start_time_str),
            end_time: parse_ts_opt(end_time_str),
        })
    }

    fn insert_trace_with(conn: &Connection, trace: &Trace) -> rusqlite::Result<usize> {
        conn.execute(
            r#"
            INSERT INTO traces (id, team_id, agent_id, conversation_id, parent_span_id,
                                span_name, attributes, start_time, end_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                trace.id,
                trace.team_id,
                trace.agent_id,
                trace.conversation_id,
                trace.parent_span_id,
                trace.span_name,
                trace.attributes.to_string(),
                trace.start_time.to_rfc3339(),
                trace.end_time.map(|t| t.to_rfc3339()),
            ],
        )
    }

    fn in_transaction<T>(
        &self,
        rows: &[T],
        insert: impl Fn(&Transaction<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for row in rows {
            insert(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl Store for Database {
    fn upsert_team(&self, team: &Team) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO teams (id, name, description, created_by, status, team_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                status = excluded.status,
                team_name = excluded.team_name
            "#,
            params![
                team.id,
                team.name,
                team.description,
                team.created_by,
                team.status.as_str(),
                team.team_name,
                team.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO agents (id, team_id, role, name, specialty, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status
            "#,
            params![
                agent.id,
                agent.team_id,
                agent.role.as_str(),
                agent.name,
                agent.specialty,
                agent.status.as_str(),
                agent.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO conversations (id, team_id, agent_id, title, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                ended_at = excluded.ended_at
            "#,
            params![
                conversation.id,
                conversation.team_id,
                conversation.agent_id,
                conversation.title,
                conversation.started_at.to_rfc3339(),
                conversation.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete_conversation_messages(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?",
            [conversation_id],
        )?;
        Ok(deleted)
    }

    fn delete_conversation_traces(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM traces WHERE conversation_id = ?",
            [conversation_id],
        )?;
        Ok(deleted)
    }

    fn insert_messages(&self, messages: &[Message]) -> Result<()> {
        self.in_transaction(messages, |tx, m| Self::insert_message_with(tx, m))
    }

    fn insert_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_message_with(&conn, message)?;
        Ok(())
    }

    fn insert_traces(&self, traces: &[Trace]) -> Result<()> {
        self.in_transaction(traces, |tx, t| Self::insert_trace_with(tx, t))
    }

    fn insert_trace(&self, trace: &Trace) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_trace_with(&conn, trace)?;
        Ok(())
    }
}
