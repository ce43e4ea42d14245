//! Database layer for crewlog
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The [`Store`] write capability the synchronizer depends on
//! - Read queries over teams, conversations, messages and traces

pub mod repo;
pub mod schema;
pub mod store;

pub use repo::Database;
pub use store::{ReplaceStats, Store};
