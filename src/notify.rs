use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::{AutoShareEvent, AutoShareFailed, AutoShareReady, AutoShareRecord};
use crate::share::AutoShareNotifier;

/// notifier that only logs
pub struct LogNotifier;

impl AutoShareNotifier for LogNotifier {
    fn ready(&self, event: AutoShareReady) {
        tracing::info!("Share link ready: {} -> {}", event.path, event.stream_url);
    }

    fn failed(&self, event: AutoShareFailed) {
        tracing::warn!("Upload complete, could not create share link for {}: {}", event.path, event.error);
    }
}

/// bounded feed of auto-share outcomes, newest first
pub struct RecentShares {
    capacity: usize,
    events: Mutex<VecDeque<AutoShareRecord>>,
}

impl RecentShares {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<AutoShareRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, event: AutoShareEvent) {
        let record = AutoShareRecord {
            id: uuid::Uuid::new_v4().to_string(),
            at: chrono::Utc::now().to_rfc3339(),
            event,
        };
        let mut events = self.lock();
        events.push_front(record);
        events.truncate(self.capacity);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AutoShareRecord>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AutoShareNotifier for RecentShares {
    fn ready(&self, event: AutoShareReady) {
        LogNotifier.ready(event.clone());
        self.push(AutoShareEvent::Ready(event));
    }

    fn failed(&self, event: AutoShareFailed) {
        LogNotifier.failed(event.clone());
        self.push(AutoShareEvent::Failed(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(path: &str) -> AutoShareReady {
        AutoShareReady {
            path: path.to_string(),
            share_hash: "h".to_string(),
            file_label: String::new(),
            stream_url: String::new(),
        }
    }

    #[test]
    fn feed_is_bounded_and_newest_first() {
        let feed = RecentShares::new(2);
        feed.ready(ready("/a"));
        feed.ready(ready("/b"));
        feed.failed(AutoShareFailed { path: "/c".to_string(), error: "boom".to_string() });

        let events = feed.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.path(), "/c");
        assert_eq!(events[1].event.path(), "/b");
    }

    #[test]
    fn records_serialize_flat() {
        let feed = RecentShares::new(4);
        feed.ready(ready("/a.jpg"));
        let json = serde_json::to_value(&feed.snapshot()[0]).unwrap();
        assert_eq!(json["kind"], "ready");
        assert_eq!(json["path"], "/a.jpg");
        assert_eq!(json["share_hash"], "h");
        assert!(json["id"].is_string());
    }
}
