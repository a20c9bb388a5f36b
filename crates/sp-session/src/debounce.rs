use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::CommentKey;

/// Quiet period after the last keystroke before a comment is saved.
pub const DEFAULT_COMMENT_DELAY: Duration = Duration::from_millis(750);

/// A comment edit whose quiet period has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEdit {
    pub key: CommentKey,
    pub text: String,
}

#[derive(Debug, Clone)]
struct Pending {
    deadline: Instant,
    text: String,
}

/// Coalesces rapid comment edits. Time is supplied by the caller, so the
/// state machine never sleeps or spawns.
#[derive(Debug, Clone)]
pub struct CommentDebouncer {
    delay: Duration,
    pending: BTreeMap<CommentKey, Pending>,
}

impl Default for CommentDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COMMENT_DELAY)
    }
}

impl CommentDebouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records an edit; any earlier pending edit for the same record is
    /// dropped and its timer restarts.
    pub fn schedule(&mut self, key: CommentKey, text: impl Into<String>, now: Instant) {
        self.pending.insert(
            key,
            Pending {
                deadline: now + self.delay,
                text: text.into(),
            },
        );
    }

    pub fn cancel(&mut self, key: &CommentKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Edits due at `now`, removed from the pending set.
    pub fn poll(&mut self, now: Instant) -> Vec<CommentEdit> {
        let due = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        due.into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|pending| CommentEdit { key, text: pending.text })
            })
            .collect()
    }

    /// Every pending edit regardless of deadline.
    pub fn flush(&mut self) -> Vec<CommentEdit> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(key, pending)| CommentEdit { key, text: pending.text })
            .collect()
    }

    /// Earliest deadline among pending edits.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}
