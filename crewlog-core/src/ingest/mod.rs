//! Ingestion pipeline: session logs in, team records out
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌─────────────────────┐     ┌─────────┐
//! │   Session logs   │ ──► │  parse_session   │ ──► │ SessionSynchronizer │ ──► │  Store  │
//! │ (root/*.jsonl,   │     │  └─ parse_log    │     │                     │     │         │
//! │  subagents/...)  │     └──────────────────┘     └─────────────────────┘     └─────────┘
//! └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crewlog_core::{Config, Database};
//! use crewlog_core::ingest::SessionSynchronizer;
//! use std::sync::Arc;
//!
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//! let sync = SessionSynchronizer::new(Arc::new(db));
//!
//! let result = sync.sync_all(&root)?;
//! println!("Synced {} of {} sessions", result.sessions_synced, result.sessions_found);
//! ```

pub mod log;
pub mod session;
mod sync;

pub use log::{parse_log, parse_log_file, parse_timestamp, LogParse, MAX_LINE_BYTES};
pub use session::{fallback_slug, parse_session, scan_sessions, session_log_path, subagents_dir};
pub use sync::{
    agent_display_name, agent_status, team_status, SessionLocks, SessionSyncStats,
    SessionSynchronizer, SyncResult, TEAM_CREATOR,
};
