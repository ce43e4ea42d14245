//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: team / agent / conversation / message / trace model
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        description      TEXT NOT NULL DEFAULT '',
        created_by       TEXT NOT NULL,
        status           TEXT NOT NULL,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agents (
        id               TEXT PRIMARY KEY,
        team_id          TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        role             TEXT NOT NULL,
        name             TEXT NOT NULL,
        specialty        TEXT NOT NULL DEFAULT '',
        status           TEXT NOT NULL,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversations (
        id               TEXT PRIMARY KEY,
        team_id          TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        agent_id         TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        title            TEXT NOT NULL,
        started_at       DATETIME NOT NULL,
        ended_at         DATETIME
    );

    CREATE TABLE IF NOT EXISTS messages (
        id               TEXT PRIMARY KEY,
        conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        team_id          TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        agent_id         TEXT,
        role             TEXT NOT NULL,
        content          TEXT NOT NULL,
        raw_thoughts     JSON,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS traces (
        id               TEXT PRIMARY KEY,
        team_id          TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        agent_id         TEXT NOT NULL,
        conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        parent_span_id   TEXT REFERENCES traces(id) ON DELETE CASCADE,
        span_name        TEXT NOT NULL,
        attributes       JSON NOT NULL,
        start_time       DATETIME NOT NULL,
        end_time         DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_agents_team ON agents(team_id);
    CREATE INDEX IF NOT EXISTS idx_conversations_team ON conversations(team_id);
    CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_team ON messages(team_id);
    CREATE INDEX IF NOT EXISTS idx_traces_conversation ON traces(conversation_id, start_time);
    CREATE INDEX IF NOT EXISTS idx_traces_parent ON traces(parent_span_id);
    CREATE INDEX IF NOT EXISTS idx_traces_agent ON traces(agent_id);
    "#,
    // Version 2: team grouping name and message lineage
    r#"
    ALTER TABLE teams ADD COLUMN team_name TEXT;
    ALTER TABLE messages ADD COLUMN source_uuid TEXT;
    ALTER TABLE messages ADD COLUMN parent_uuid TEXT;

    CREATE INDEX IF NOT EXISTS idx_messages_source_uuid ON messages(source_uuid);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
