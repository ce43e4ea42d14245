//! Debounce bookkeeping for changed sessions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sessions with unsynced changes, keyed by id, valued by the time of the latest change.
#[derive(Debug, Default)]
pub struct PendingSessions {
    last_change: HashMap<String, Instant>,
}

impl PendingSessions {
    /// Record a change, restarting the session's quiet period.
    pub fn touch(&mut self, session_id: &str, at: Instant) {
        self.last_change.insert(session_id.to_string(), at);
    }

    /// Remove and return sessions quiet for at least `debounce`, sorted by id.
    pub fn take_ready(&mut self, now: Instant, debounce: Duration) -> Vec<String> {
        let mut ready: Vec<String> = self
            .last_change
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= debounce)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ready {
            self.last_change.remove(id);
        }
        ready.sort();
        ready
    }

    pub fn len(&self) -> usize {
        self.last_change.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_change.is_empty()
    }
}
