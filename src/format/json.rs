// Structured JSON formatter: one object per record

use chrono::{DateTime, Utc};
use serde_json::json;

use super::Formatter;
use crate::message::Message;

/// Emits each record as a single JSON object.
///
/// Shape: `timestamp` (RFC 3339, UTC), `level`, `logger`, `message`, plus
/// `source` when the record carries a call site and `fields` when it carries
/// structured data.
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, message: &Message) -> Vec<u8> {
        let timestamp: DateTime<Utc> = message.timestamp().into();

        let mut object = json!({
            "timestamp": timestamp.to_rfc3339(),
            "level": message.level().as_str(),
            "logger": message.name(),
            "message": message.text(),
        });

        let source = message.source();
        if !source.file.is_empty() {
            object["source"] = json!({
                "file": source.file,
                "module": source.module,
                "line": source.line,
            });
        }

        if !message.structured().is_empty() {
            object["fields"] =
                serde_json::to_value(message.structured()).unwrap_or(serde_json::Value::Null);
        }

        serde_json::to_vec(&object).unwrap_or_default()
    }
}
