//! Storage capability consumed by the synchronizer.
//!
//! [`Database`](super::Database) is the SQLite implementation. Tests use
//! in-memory stores that fail on demand to exercise the fallback paths.

use crate::error::Result;
use crate::types::{Agent, Conversation, Message, Team, Trace};

/// Rows written by [`Store::replace_conversation`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceStats {
    pub messages_inserted: usize,
    pub traces_inserted: usize,
    /// Rows that failed even when inserted one at a time
    pub rows_failed: usize,
}

/// Write side of the entity model.
///
/// Upserts overwrite the mutable fields of an existing row and leave creation
/// fields alone. Batch inserts are all-or-nothing.
pub trait Store: Send + Sync {
    fn upsert_team(&self, team: &Team) -> Result<()>;

    fn upsert_agent(&self, agent: &Agent) -> Result<()>;

    fn upsert_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Returns the number of rows removed
    fn delete_conversation_messages(&self, conversation_id: &str) -> Result<usize>;

    /// Returns the number of rows removed
    fn delete_conversation_traces(&self, conversation_id: &str) -> Result<usize>;

    fn insert_messages(&self, messages: &[Message]) -> Result<()>;

    fn insert_message(&self, message: &Message) -> Result<()>;

    fn insert_traces(&self, traces: &[Trace]) -> Result<()>;

    fn insert_trace(&self, trace: &Trace) -> Result<()>;

    /// Make a conversation's messages and traces exactly `messages` and `traces`.
    ///
    /// Deletes the existing rows, then inserts in batches of `batch_size`. A batch
    /// that fails is retried row by row; rows that still fail are logged and
    /// counted in [`ReplaceStats::rows_failed`]. Deletion failures are returned.
    fn replace_conversation(
        &self,
        conversation_id: &str,
        messages: &[Message],
        traces: &[Trace],
        batch_size: usize,
    ) -> Result<ReplaceStats> {
        self.delete_conversation_messages(conversation_id)?;
        self.delete_conversation_traces(conversation_id)?;

        let mut stats = ReplaceStats::default();

        let (inserted, failed) = insert_batched(
            messages,
            batch_size,
            |chunk| self.insert_messages(chunk),
            |message| self.insert_message(message),
            |message| message.id.as_str(),
            "message",
        );
        stats.messages_inserted = inserted;
        stats.rows_failed += failed;

        let (inserted, failed) = insert_batched(
            traces,
            batch_size,
            |chunk| self.insert_traces(chunk),
            |trace| self.insert_trace(trace),
            |trace| trace.id.as_str(),
            "trace",
        );
        stats.traces_inserted = inserted;
        stats.rows_failed += failed;

        Ok(stats)
    }
}

/// Returns `(inserted, failed)`.
fn insert_batched<T>(
    rows: &[T],
    batch_size: usize,
    insert_batch: impl Fn(&[T]) -> Result<()>,
    insert_one: impl Fn(&T) -> Result<()>,
    row_id: impl Fn(&T) -> &str,
    kind: &'static str,
) -> (usize, usize) {
    let mut inserted = 0;
    let mut failed = 0;

    for chunk in rows.chunks(batch_size.max(1)) {
        match insert_batch(chunk) {
            Ok(()) => inserted += chunk.len(),
            Err(e) => {
                tracing::warn!(
                    kind,
                    batch_len = chunk.len(),
                    error = %e,
                    "Batch insert failed, retrying row by row"
                );
                for row in chunk {
                    match insert_one(row) {
                        Ok(()) => inserted += 1,
                        Err(e) => {
                            failed += 1;
                            tracing::warn!(kind, id = row_id(row), error = %e, "Row insert failed");
                        }
                    }
                }
            }
        }
    }

    (inserted, failed)
}
