use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Lifecycle,
    Inbound,
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub category: EventCategory,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Bounded, append-only record of received events; the oldest entry is
/// evicted once `capacity` is reached.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn append(&mut self, entry: EventLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn latest(&self, name: &str) -> Option<&EventLogEntry> {
        self.entries.iter().rev().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(name: &str, n: u64) -> EventLogEntry {
        EventLogEntry {
            category: EventCategory::Inbound,
            name: name.to_string(),
            timestamp: Utc::now(),
            payload: json!({ "n": n }),
        }
    }

    #[test]
    fn evicts_oldest_entries_past_capacity() {
        let mut log = EventLog::new(2);
        log.append(entry("message:new", 1));
        log.append(entry("message:new", 2));
        log.append(entry("typing:update", 3));

        assert_eq!(log.len(), 2);
        let payloads: Vec<_> = log.entries().map(|e| e.payload.clone()).collect();
        assert_eq!(payloads, vec![json!({ "n": 2 }), json!({ "n": 3 })]);
    }

    #[test]
    fn latest_returns_most_recent_entry_for_name() {
        let mut log = EventLog::new(10);
        log.append(entry("message:new", 1));
        log.append(entry("typing:update", 2));
        log.append(entry("message:new", 3));

        assert_eq!(
            log.latest("message:new").map(|e| e.payload.clone()),
            Some(json!({ "n": 3 }))
        );
        assert!(log.latest("message:read").is_none());
    }

    #[test]
    fn zero_capacity_still_keeps_latest() {
        let mut log = EventLog::new(0);
        log.append(entry("message:new", 1));
        log.append(entry("message:new", 2));
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.latest("message:new").map(|e| e.payload.clone()),
            Some(json!({ "n": 2 }))
        );
    }
}
