use std::collections::VecDeque;

use serde::{Serialize, Serializer};

use flowdeck_core::types::{now_millis, LogEntry, LogLevel, StepTrace};

/// A log entry before it has been assigned an id and timestamp.
#[derive(Debug, Clone)]
pub struct LogLine {
    level: LogLevel,
    message: String,
    element_id: Option<String>,
    trace: Option<StepTrace>,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            element_id: None,
            trace: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Reference the element this line is about.
    pub fn element(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    /// Attach an execution trace.
    pub fn trace(mut self, trace: StepTrace) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Bounded, append-only log trail.
///
/// Entries are ordered by insertion. Ids increase monotonically and are never
/// reused, even across `clear()`. Timestamps never go backwards. Once
/// `capacity` is reached the oldest entry is evicted for every new one.
#[derive(Debug, Clone)]
pub struct LogStore {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
    last_timestamp: i64,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
            last_timestamp: 0,
        }
    }

    /// Append a line, returning the stored entry.
    pub fn append(&mut self, line: LogLine) -> &LogEntry {
        let timestamp = now_millis().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let entry = LogEntry {
            id: self.next_id,
            timestamp,
            level: line.level,
            message: line.message,
            element_id: line.element_id,
            trace: line.trace,
        };
        self.next_id += 1;

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Id the next appended entry will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn get(&self, id: u64) -> Option<&LogEntry> {
        // Ids are contiguous within the buffer
        let first = self.entries.front()?.id;
        let idx = id.checked_sub(first)? as usize;
        self.entries.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Serialize for LogStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_ids_in_order() {
        let mut logs = LogStore::new(10);
        logs.append(LogLine::info("one"));
        logs.append(LogLine::success("two").element("action-1"));

        let entries = logs.to_vec();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[1].id, 2);
        assert_eq!(entries[1].level, LogLevel::Success);
        assert_eq!(entries[1].element_id.as_deref(), Some("action-1"));
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut logs = LogStore::new(3);
        for i in 0..5 {
            logs.append(LogLine::info(format!("line {}", i)));
        }

        let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(logs.get(3).map(|e| e.message.as_str()), Some("line 2"));
        assert!(logs.get(1).is_none());
    }

    #[test]
    fn test_clear_keeps_id_sequence() {
        let mut logs = LogStore::new(10);
        logs.append(LogLine::info("before"));
        logs.clear();
        assert!(logs.is_empty());

        let id = logs.append(LogLine::warning("after")).id;
        assert_eq!(id, 2);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut logs = LogStore::new(0);
        logs.append(LogLine::info("a"));
        logs.append(LogLine::info("b"));
        assert_eq!(logs.capacity(), 1);
        assert_eq!(logs.last().map(|e| e.message.as_str()), Some("b"));
    }

    #[test]
    fn test_serializes_as_sequence() {
        let mut logs = LogStore::new(5);
        logs.append(LogLine::error("boom"));
        let value = serde_json::to_value(&logs).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["level"], "error");
        assert_eq!(value[0]["message"], "boom");
    }
}
