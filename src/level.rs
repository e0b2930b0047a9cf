// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log levels (severity-ordered, Trace is lowest)

use serde::{Deserialize, Serialize};

/// Log levels (0-6, higher is more severe; `Off` disables output)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Verbose execution traces
    Trace = 0,
    /// Diagnostic detail for development
    Debug = 1,
    /// Normal operational messages
    Info = 2,
    /// Something surprising but recoverable
    Warn = 3,
    /// An operation failed
    Error = 4,
    /// The process cannot continue
    Fatal = 5,
    /// Filter value that suppresses everything
    Off = 6,
}

impl Level {
    /// Get level as u8 (0-6)
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get level name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Off => "OFF",
        }
    }

    /// Create from u8 value (returns None if invalid)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Level::Trace),
            1 => Some(Level::Debug),
            2 => Some(Level::Info),
            3 => Some(Level::Warn),
            4 => Some(Level::Error),
            5 => Some(Level::Fatal),
            6 => Some(Level::Off),
            _ => None,
        }
    }

    /// Whether a record at this level passes a filter set to `threshold`
    #[inline]
    pub const fn passes(self, threshold: Level) -> bool {
        self.as_u8() >= threshold.as_u8() && self.as_u8() < Level::Off.as_u8()
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
