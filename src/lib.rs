// SPDX-License-Identifier: Apache-2.0 OR MIT

//! High-throughput, multi-threaded logging.
//!
//! Producer threads draw recycled records from a [`MessagePool`], fill them,
//! and enqueue them to a [`WorkerPool`]; worker threads format each record
//! and dispatch it to the owning logger's sinks. Producers never block on
//! sink I/O, and delivery is best-effort: under pool exhaustion records are
//! dropped and counted, never buffered unboundedly.
//!
//! Most programs interact with the [`LogManager`]:
//!
//! ```no_run
//! use logforge::LogManager;
//!
//! let manager = LogManager::global();
//! manager.initialize().unwrap();
//!
//! let logger = manager.get_logger("net").unwrap();
//! logforge::log_info!(logger, "listening on {}", "0.0.0.0:5000");
//!
//! manager.shutdown(true, std::time::Duration::from_secs(5)).unwrap();
//! ```
//!
//! The lock-free building blocks (hazard-pointer domain, copy-on-write list,
//! bounded MPMC ring) live in [`core`] and are usable on their own.

pub mod core;
pub mod error;
pub mod format;
pub mod level;
pub mod logger;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod message;
pub mod registry;
pub mod sink;
pub mod structured;

pub use crate::core::hazard::{HazardDomain, HazardGuard, MAX_HAZARD_POINTERS};
pub use crate::core::message_pool::MessagePool;
pub use crate::core::rcu_list::RcuList;
pub use crate::core::ring_queue::RingQueue;
pub use crate::core::string_storage::StringStorage;
pub use crate::core::worker_pool::WorkerPool;
pub use crate::error::{Error, Result};
pub use crate::format::{Format, Formatter, JsonFormatter, LogFormat, PatternFormatter};
pub use crate::level::Level;
pub use crate::logger::Logger;
pub use crate::manager::{LogManager, ManagerState, DEFAULT_LOGGER_NAME};
pub use crate::message::{Message, MessagePtr, MessageState, SourceLocation};
pub use crate::sink::{ConsoleSink, FileOptions, FileSink, MemorySink, Sink, TerminalCapabilities};
pub use crate::structured::{FieldValue, StructuredData};

/// Compile-time gates consulted by the logging macros. Stripped calls
/// compile to `false` with no argument evaluation beyond the gate.
pub const LOGGING_ENABLED: bool = cfg!(not(feature = "disable-logging"));
pub const TRACE_ENABLED: bool =
    cfg!(not(any(feature = "disable-logging", feature = "disable-trace")));
pub const DEBUG_ENABLED: bool =
    cfg!(not(any(feature = "disable-logging", feature = "disable-debug")));
