use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Oldest entries are dropped past this point.
const KEEP: usize = 50;

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Client-only notification stream. Never persisted, never sent remotely.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: VecDeque<Notification>,
}

impl NotificationLog {
    pub fn push(&mut self, content: String) {
        self.entries.push_front(Notification {
            id: Uuid::new_v4().to_string(),
            content,
            created_at: Utc::now(),
        });
        self.entries.truncate(KEEP);
    }

    /// Empties the log, oldest entry first.
    pub fn drain(&mut self) -> Vec<Notification> {
        self.entries.drain(..).rev().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_chronological_order() {
        let mut log = NotificationLog::default();
        log.push("first".to_owned());
        log.push("second".to_owned());

        let drained = log.drain();
        assert_eq!(drained[0].content, "first");
        assert_eq!(drained[1].content, "second");
        assert!(log.drain().is_empty());
    }

    #[test]
    fn drops_oldest_entries_past_the_cap() {
        let mut log = NotificationLog::default();
        for i in 0..KEEP + 10 {
            log.push(format!("entry {i}"));
        }

        let drained = log.drain();
        assert_eq!(drained.len(), KEEP);
        assert_eq!(drained[0].content, "entry 10");
    }
}
