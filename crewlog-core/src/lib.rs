//! # crewlog-core
//!
//! Core library for crewlog - turns agent session logs into team records.
//!
//! This library provides:
//! - Parsing of session logs and their sub-agent logs
//! - A synchronizer that rewrites a session's conversations in the store
//! - A debounced directory watcher that re-syncs sessions as they change
//! - SQLite storage, configuration and logging
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Logs:** JSONL files on disk, one per session plus one per sub-agent (read-only)
//! - **Parsed:** [`ParsedSession`] values built by [`ingest::parse_session`]
//! - **Stored:** teams, agents, conversations, messages and traces written through [`Store`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use crewlog_core::{Config, Database, SessionSynchronizer};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let sync = SessionSynchronizer::with_config(Arc::new(db), config.sync.clone());
//! let result = sync.sync_all(&config.source.resolve_root()).expect("sync failed");
//! println!("{} sessions synced", result.sessions_synced);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, ReplaceStats, Store};
pub use error::{Error, Result};
pub use ingest::{SessionSyncStats, SessionSynchronizer, SyncResult};
pub use types::*;
pub use watch::{FsWatch, NotifyWatch, SessionWatcher};

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod types;
pub mod watch;
