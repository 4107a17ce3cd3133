//! Deferred work of a ringing alarm, each entry with its own cancellation token.

use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    AutoDismiss,
    VibrationPulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    kind: TaskKind,
    due: NaiveDateTime,
    token: TaskToken,
}

/// At most one pending task per kind; scheduling a kind again replaces it.
#[derive(Debug, Default)]
pub struct Tasks {
    entries: Vec<Entry>,
    next_token: u64,
}

impl Tasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TaskKind, due: NaiveDateTime) -> TaskToken {
        self.cancel(kind);
        let token = TaskToken(self.next_token);
        self.next_token += 1;
        self.entries.push(Entry { kind, due, token });
        token
    }

    /// returns false if nothing of that kind was pending
    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.kind != kind);
        before != self.entries.len()
    }

    pub fn cancel_token(&mut self, token: TaskToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.token != token);
        before != self.entries.len()
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    /// Removes and returns the tasks due at `now`, earliest first.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<(TaskKind, TaskToken)> {
        let (mut due, pending): (Vec<Entry>, Vec<Entry>) =
            self.entries.iter().copied().partition(|entry| entry.due <= now);
        self.entries = pending;
        due.sort_by_key(|entry| (entry.due, entry.token));
        due.into_iter().map(|entry| (entry.kind, entry.token)).collect()
    }

    #[must_use]
    pub fn due_at(&self, kind: TaskKind) -> Option<NaiveDateTime> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.due)
    }

    #[must_use]
    pub fn is_pending(&self, kind: TaskKind) -> bool {
        self.due_at(kind).is_some()
    }

    #[must_use]
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.entries.iter().map(|entry| entry.due).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
