// A named logging channel: level filter, sink list, record construction

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::SystemTime;

use crate::core::hazard::HazardDomain;
use crate::core::message_pool::MessagePool;
use crate::core::rcu_list::RcuList;
use crate::core::string_storage::StringStorage;
use crate::core::worker_pool::WorkerPool;
use crate::format::Format;
use crate::level::Level;
use crate::message::{MessagePtr, SourceLocation};
use crate::sink::Sink;
use crate::structured::StructuredData;

#[track_caller]
fn caller_location(module: &'static str) -> SourceLocation {
    let location = std::panic::Location::caller();
    SourceLocation::new(location.file(), module, location.line())
}

/// A named channel producing log records.
///
/// Producers call `log` (or the level helpers); the record is drawn from the
/// shared pool, filled, and enqueued to the worker pool with its level as
/// priority. Workers later call `process_message`, which fans the record out
/// to a snapshot of the sink list.
///
/// Loggers are handed out as `Arc<Logger>` by the registry and stay safe to
/// use after manager shutdown: enqueueing against a stopped worker pool
/// simply releases the record.
pub struct Logger {
    name: Arc<str>,
    level: AtomicU8,
    format: RwLock<Format>,
    sinks: RcuList<Arc<dyn Sink>>,
    dropped_messages: AtomicU64,
    total_processed: AtomicU64,
    pool: Arc<MessagePool>,
    workers: Arc<WorkerPool>,
    weak_self: Weak<Logger>,
}

impl Logger {
    /// Logger with a private reclamation domain for its sink list
    pub fn new(
        name: &str,
        level: Level,
        pool: Arc<MessagePool>,
        workers: Arc<WorkerPool>,
    ) -> Arc<Self> {
        Self::build(name, level, pool, workers, None)
    }

    /// Logger whose sink list reclaims through a shared hazard domain
    pub fn with_domain(
        name: &str,
        level: Level,
        pool: Arc<MessagePool>,
        workers: Arc<WorkerPool>,
        domain: Arc<HazardDomain>,
    ) -> Arc<Self> {
        Self::build(name, level, pool, workers, Some(domain))
    }

    fn build(
        name: &str,
        level: Level,
        pool: Arc<MessagePool>,
        workers: Arc<WorkerPool>,
        domain: Option<Arc<HazardDomain>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            name: Arc::from(name),
            level: AtomicU8::new(level.as_u8()),
            format: RwLock::new(Format::default()),
            sinks: match domain {
                Some(domain) => RcuList::with_domain(domain),
                None => RcuList::new(),
            },
            dropped_messages: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            pool,
            workers,
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Info)
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn is_level_enabled(&self, level: Level) -> bool {
        level.passes(Level::from_u8(self.level.load(Ordering::Acquire)).unwrap_or(Level::Info))
    }

    /// Emit a record.
    ///
    /// Returns false when the text is empty, the level is filtered, or the
    /// pool is exhausted (counted in `dropped_message_count`).
    pub fn log(&self, text: &str, level: Level, location: SourceLocation) -> bool {
        if text.is_empty() || !self.is_level_enabled(level) {
            return false;
        }

        let msg = match self.create_message(text, None, level, location) {
            Some(msg) => msg,
            None => return false,
        };

        self.enqueue(msg, level);
        true
    }

    /// Emit a record carrying structured fields
    pub fn log_structured(
        &self,
        text: &str,
        data: &StructuredData,
        level: Level,
        location: SourceLocation,
    ) -> bool {
        if text.is_empty() || !self.is_level_enabled(level) {
            return false;
        }

        let msg = match self.create_message(text, Some(data), level, location) {
            Some(msg) => msg,
            None => return false,
        };

        self.enqueue(msg, level);
        true
    }

    // The level helpers capture the caller's file and line through
    // `#[track_caller]`. Rust has no runtime hook for the caller's module,
    // so the triple's module field records this logging module here; the
    // `log_trace!`..`log_fatal!` macros expand `module_path!()` at the call
    // site and capture the caller's module as well.

    #[track_caller]
    pub fn trace(&self, text: &str) -> bool {
        self.log(text, Level::Trace, caller_location(module_path!()))
    }

    #[track_caller]
    pub fn debug(&self, text: &str) -> bool {
        self.log(text, Level::Debug, caller_location(module_path!()))
    }

    #[track_caller]
    pub fn info(&self, text: &str) -> bool {
        self.log(text, Level::Info, caller_location(module_path!()))
    }

    #[track_caller]
    pub fn warn(&self, text: &str) -> bool {
        self.log(text, Level::Warn, caller_location(module_path!()))
    }

    #[track_caller]
    pub fn error(&self, text: &str) -> bool {
        self.log(text, Level::Error, caller_location(module_path!()))
    }

    #[track_caller]
    pub fn fatal(&self, text: &str) -> bool {
        self.log(text, Level::Fatal, caller_location(module_path!()))
    }

    /// Flush every sink in the current snapshot
    pub fn flush(&self) {
        let guard = self.sinks.read();
        for sink in guard.items() {
            sink.flush();
        }
    }

    pub fn register_sink(&self, sink: Arc<dyn Sink>) {
        self.sinks.add(sink);
    }

    pub fn register_sinks(&self, sinks: &[Arc<dyn Sink>]) {
        self.sinks.add_range(sinks);
    }

    /// Clone of the current sink snapshot
    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.read().items().to_vec()
    }

    pub fn format(&self) -> Format {
        self.format.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_format(&self, format: Format) {
        *self.format.write().unwrap_or_else(|e| e.into_inner()) = format;
    }

    pub fn dropped_message_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn reset_dropped_message_count(&self) {
        self.dropped_messages.store(0, Ordering::Relaxed);
    }

    /// Records handed to the worker pool so far
    pub fn processed_count(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    fn create_message(
        &self,
        text: &str,
        data: Option<&StructuredData>,
        level: Level,
        location: SourceLocation,
    ) -> Option<MessagePtr> {
        let msg = match self.pool.acquire() {
            Some(msg) => msg,
            None => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        // SAFETY: a freshly acquired record has exactly one holder
        unsafe {
            let message = msg.as_mut();
            message.timestamp = SystemTime::now();
            message.name = Some(Arc::clone(&self.name));
            message.level = level;
            message.source = location;
            message.storage = StringStorage::create(text);
            message.logger = self.weak_self.clone();
            if let Some(data) = data {
                message.structured = data.clone();
            }
        }

        Some(msg)
    }

    fn enqueue(&self, msg: MessagePtr, level: Level) {
        self.workers.enqueue(msg, level.as_u8());
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Worker-side fan-out: hand the record to every sink in the current
    /// snapshot, then release it back to the pool
    pub(crate) fn process_message(&self, msg: MessagePtr) {
        // SAFETY: the worker holds a queue reference
        let message = unsafe { msg.as_ref() };

        if message.is_active() {
            let format = self.format.read().unwrap_or_else(|e| e.into_inner());
            let guard = self.sinks.read();
            for sink in guard.items() {
                sink.output(message, &format);
            }
        }

        self.pool.release(msg);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name())
            .field("level", &self.level())
            .field("sinks", &self.sinks.estimated_len())
            .field("dropped", &self.dropped_message_count())
            .finish()
    }
}
