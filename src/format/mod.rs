// Formatting: turning a record into the byte stream a sink writes

mod json;
mod pattern;

pub use json::JsonFormatter;
pub use pattern::PatternFormatter;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Built-in output shapes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable line driven by a token pattern
    Pattern = 0,
    /// One JSON object per record, structured fields included
    Json = 1,
}

impl LogFormat {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogFormat::Pattern),
            1 => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Pure record-to-bytes function called inside `Sink::output`.
///
/// Implementations must not retain the record and must be side-effect-free
/// with respect to it.
pub trait Formatter: Send + Sync {
    fn format(&self, message: &Message) -> Vec<u8>;
}

/// A logger's formatting configuration: a shape tag plus the formatter that
/// realizes it. Cheap to clone; sinks receive it by reference.
#[derive(Clone)]
pub struct Format {
    kind: LogFormat,
    formatter: Arc<dyn Formatter>,
}

impl Format {
    pub fn new(kind: LogFormat) -> Self {
        let formatter: Arc<dyn Formatter> = match kind {
            LogFormat::Pattern => Arc::new(PatternFormatter::new()),
            LogFormat::Json => Arc::new(JsonFormatter::new()),
        };
        Self { kind, formatter }
    }

    /// A custom formatter presented under the given shape tag
    pub fn with_formatter(kind: LogFormat, formatter: Arc<dyn Formatter>) -> Self {
        Self { kind, formatter }
    }

    pub fn kind(&self) -> LogFormat {
        self.kind
    }

    pub fn render(&self, message: &Message) -> Vec<u8> {
        self.formatter.format(message)
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new(LogFormat::Pattern)
    }
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format").field("kind", &self.kind).finish()
    }
}
