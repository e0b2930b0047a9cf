// In-memory capture sink for tests and demos

use std::sync::Mutex;

use super::Sink;
use crate::format::Format;
use crate::level::Level;
use crate::message::Message;

/// Captures every record it receives.
///
/// Stores the formatted bytes and the record's level, in arrival order.
pub struct MemorySink {
    records: Mutex<Vec<(Level, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Captured lines as strings, in arrival order
    pub fn records(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Levels of the captured records, in arrival order
    pub fn levels(&self) -> Vec<Level> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(level, _)| *level)
            .collect()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for MemorySink {
    fn output(&self, message: &Message, format: &Format) {
        // The record must be observed fully valid or not at all
        debug_assert!(message.is_active());
        debug_assert!(message.ref_count() >= 1);

        let bytes = format.render(message);
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.level(), bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::string_storage::StringStorage;
    use crate::message::MessageState;
    use std::sync::atomic::Ordering;

    fn active_message(level: Level, text: &str) -> Message {
        let mut message = Message::pooled();
        message.level = level;
        message.storage = StringStorage::create(text);
        message.state
            .store(MessageState::Active as u8, Ordering::Release);
        message.ref_count.store(1, Ordering::Release);
        message
    }

    #[test]
    fn test_captures_in_order() {
        let sink = MemorySink::new();
        let format = Format::default();

        sink.output(&active_message(Level::Info, "one"), &format);
        sink.output(&active_message(Level::Error, "two"), &format);

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.levels(), vec![Level::Info, Level::Error]);
        assert!(sink.records()[0].contains("one"));
        assert!(sink.records()[1].contains("two"));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }
}
