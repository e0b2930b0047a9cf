// Process-wide lifecycle: owns the hazard domain, message pool, registry,
// worker pool, and the global sink list

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use crate::core::hazard::HazardDomain;
use crate::core::message_pool::MessagePool;
use crate::core::rcu_list::RcuList;
use crate::core::worker_pool::{WorkerPool, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::{Error, Result};
use crate::format::{Format, LogFormat};
use crate::level::Level;
use crate::logger::Logger;
use crate::registry::LoggerRegistry;
use crate::sink::{ConsoleSink, Sink};

/// Name of the logger created at initialization
pub const DEFAULT_LOGGER_NAME: &str = "main";

/// Lifecycle states; transitions only move forward
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    ShuttingDown = 3,
    ShutDown = 4,
}

impl ManagerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ManagerState::Uninitialized => "Uninitialized",
            ManagerState::Initializing => "Initializing",
            ManagerState::Running => "Running",
            ManagerState::ShuttingDown => "ShuttingDown",
            ManagerState::ShutDown => "ShutDown",
        }
    }

    const fn from_u8(value: u8) -> ManagerState {
        match value {
            1 => ManagerState::Initializing,
            2 => ManagerState::Running,
            3 => ManagerState::ShuttingDown,
            4 => ManagerState::ShutDown,
            _ => ManagerState::Uninitialized,
        }
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_thread_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(1)
}

/// Owner of the logging runtime.
///
/// A process normally uses [`LogManager::global`]; independent instances are
/// constructible for tests and embedding. Dropping a manager performs a
/// best-effort shutdown.
pub struct LogManager {
    state: AtomicU8,
    init_result: OnceLock<Result<()>>,
    hazard: Arc<HazardDomain>,
    message_pool: OnceLock<Arc<MessagePool>>,
    registry: OnceLock<LoggerRegistry>,
    worker_pool: RwLock<Option<Arc<WorkerPool>>>,
    global_sinks: RcuList<Arc<dyn Sink>>,
    default_level: AtomicU8,
    default_format: AtomicU8,
    default_logger_name: RwLock<Arc<str>>,
    registration_lock: Mutex<()>,
    config_version: AtomicU64,
}

impl LogManager {
    pub fn new() -> Self {
        let hazard = Arc::new(HazardDomain::new());
        Self {
            state: AtomicU8::new(ManagerState::Uninitialized as u8),
            init_result: OnceLock::new(),
            global_sinks: RcuList::with_domain(Arc::clone(&hazard)),
            hazard,
            message_pool: OnceLock::new(),
            registry: OnceLock::new(),
            worker_pool: RwLock::new(None),
            default_level: AtomicU8::new(Level::Info.as_u8()),
            default_format: AtomicU8::new(LogFormat::Pattern.as_u8()),
            default_logger_name: RwLock::new(Arc::from(DEFAULT_LOGGER_NAME)),
            registration_lock: Mutex::new(()),
            config_version: AtomicU64::new(0),
        }
    }

    /// The process-wide instance
    pub fn global() -> &'static LogManager {
        static INSTANCE: OnceLock<LogManager> = OnceLock::new();
        INSTANCE.get_or_init(LogManager::new)
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ManagerState, to: ManagerState) -> bool {
        self.state
            .compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Bring the manager to `Running`: construct the pools and registry and
    /// create the default logger with a console sink.
    ///
    /// Call-once: later calls return the first outcome without re-running.
    pub fn initialize(&self) -> Result<()> {
        self.init_result
            .get_or_init(|| self.initialize_once())
            .clone()
    }

    fn initialize_once(&self) -> Result<()> {
        if !self.transition(ManagerState::Uninitialized, ManagerState::Initializing) {
            return Err(Error::InvalidState {
                expected: ManagerState::Uninitialized,
                actual: self.state(),
            });
        }

        let pool = Arc::clone(self.message_pool());
        let _ = self.registry();

        let workers = Arc::new(WorkerPool::new(default_thread_count(), pool));
        *self
            .worker_pool
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(workers);

        self.create_default_logger();

        self.state
            .store(ManagerState::Running as u8, Ordering::Release);
        Ok(())
    }

    /// Stop the pipeline.
    ///
    /// With `wait`, queued records are flushed and workers are joined within
    /// `timeout`. The registry and global sink list are cleared; loggers
    /// already handed out remain usable but their records are dropped.
    pub fn shutdown(&self, wait: bool, timeout: Duration) -> Result<()> {
        if !self.transition(ManagerState::Running, ManagerState::ShuttingDown) {
            return Err(Error::InvalidState {
                expected: ManagerState::Running,
                actual: self.state(),
            });
        }

        let workers = self
            .worker_pool
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(workers) = workers {
            if wait {
                workers.flush(timeout);
            }
            workers.shutdown(wait, timeout);
        }

        if let Some(registry) = self.registry.get() {
            registry.clear();
        }
        self.global_sinks.clear();

        self.state
            .store(ManagerState::ShutDown as u8, Ordering::Release);
        Ok(())
    }

    /// Return the logger named `name`, creating it if absent
    pub fn get_logger(&self, name: &str) -> Result<Arc<Logger>> {
        if let Some(logger) = self.registry().find(name) {
            return Ok(logger);
        }
        self.register_logger(name)
    }

    /// Create (or return) the logger named `name`.
    ///
    /// New loggers inherit the current default level, default format, and
    /// every currently registered global sink.
    pub fn register_logger(&self, name: &str) -> Result<Arc<Logger>> {
        let state = self.state();
        if state != ManagerState::Running {
            return Err(Error::InvalidState {
                expected: ManagerState::Running,
                actual: state,
            });
        }
        if name.is_empty() {
            return Err(Error::EmptyLoggerName);
        }

        if let Some(existing) = self.registry().find(name) {
            return Ok(existing);
        }

        // Serialize creations so a registration race cannot publish the same
        // name twice; lookups above stay lock-free
        let _lock = self
            .registration_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = self.registry().find(name) {
            return Ok(existing);
        }

        let logger = self.build_logger(name);
        Ok(self.registry().insert(name, logger))
    }

    pub fn default_logger(&self) -> Result<Arc<Logger>> {
        let name = Arc::clone(
            &self
                .default_logger_name
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        );
        self.get_logger(&name)
    }

    pub fn has_logger(&self, name: &str) -> bool {
        self.state() == ManagerState::Running && self.registry().contains(name)
    }

    /// Remove a logger; the default logger is protected
    pub fn remove_logger(&self, name: &str) -> bool {
        if self.state() != ManagerState::Running {
            return false;
        }
        let default_name = Arc::clone(
            &self
                .default_logger_name
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        );
        if &*default_name == name {
            return false;
        }
        self.registry().remove(name)
    }

    /// Registered logger count (approximate under concurrent registration)
    pub fn logger_count(&self) -> usize {
        self.registry().len()
    }

    /// Attach `sink` to every logger created from now on.
    ///
    /// Existing loggers are not updated retroactively.
    pub fn register_sink(&self, sink: Arc<dyn Sink>) {
        if self.state() != ManagerState::Running {
            return;
        }
        self.global_sinks.add(sink);
    }

    pub fn default_level(&self) -> Level {
        Level::from_u8(self.default_level.load(Ordering::Acquire)).unwrap_or(Level::Info)
    }

    pub fn set_default_level(&self, level: Level) {
        if self.state() != ManagerState::Running {
            return;
        }
        self.default_level.store(level.as_u8(), Ordering::Release);
        self.config_version.fetch_add(1, Ordering::Release);
    }

    pub fn default_format(&self) -> LogFormat {
        LogFormat::from_u8(self.default_format.load(Ordering::Acquire))
            .unwrap_or(LogFormat::Pattern)
    }

    pub fn set_default_format(&self, format: LogFormat) {
        if self.state() != ManagerState::Running {
            return;
        }
        self.default_format.store(format.as_u8(), Ordering::Release);
        self.config_version.fetch_add(1, Ordering::Release);
    }

    pub fn default_logger_name(&self) -> String {
        self.default_logger_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_string()
    }

    /// Rename the default logger; creates it if no logger has the new name
    pub fn set_default_logger_name(&self, name: &str) {
        if self.state() != ManagerState::Running || name.is_empty() {
            return;
        }

        *self
            .default_logger_name
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::from(name);

        if !self.has_logger(name) {
            self.create_default_logger();
        }
    }

    pub fn thread_pool_size(&self) -> usize {
        self.worker_pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|workers| workers.thread_count())
            .unwrap_or(0)
    }

    pub fn set_thread_pool_size(&self, size: usize) {
        if self.state() != ManagerState::Running {
            return;
        }
        let _ = self.resize_thread_pool(size);
    }

    pub fn resize_thread_pool(&self, size: usize) -> bool {
        if self.state() != ManagerState::Running {
            return false;
        }
        self.ensure_worker_pool().resize(size)
    }

    /// Bumped on every defaults change; observability only
    pub fn config_version(&self) -> u64 {
        self.config_version.load(Ordering::Acquire)
    }

    /// The shared record pool (exposed for statistics and tuning)
    pub fn message_pool(&self) -> &Arc<MessagePool> {
        self.message_pool
            .get_or_init(|| Arc::new(MessagePool::new()))
    }

    fn registry(&self) -> &LoggerRegistry {
        self.registry
            .get_or_init(|| LoggerRegistry::new(Arc::clone(&self.hazard)))
    }

    fn ensure_worker_pool(&self) -> Arc<WorkerPool> {
        if let Some(workers) = self
            .worker_pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Arc::clone(workers);
        }

        let mut slot = self.worker_pool.write().unwrap_or_else(|e| e.into_inner());
        if let Some(workers) = slot.as_ref() {
            return Arc::clone(workers);
        }
        let workers = Arc::new(WorkerPool::new(
            default_thread_count(),
            Arc::clone(self.message_pool()),
        ));
        *slot = Some(Arc::clone(&workers));
        workers
    }

    fn build_logger(&self, name: &str) -> Arc<Logger> {
        let logger = Logger::with_domain(
            name,
            self.default_level(),
            Arc::clone(self.message_pool()),
            self.ensure_worker_pool(),
            Arc::clone(&self.hazard),
        );
        logger.set_format(Format::new(self.default_format()));

        let sinks = self.global_sinks.read();
        logger.register_sinks(sinks.items());

        logger
    }

    fn create_default_logger(&self) {
        let name = Arc::clone(
            &self
                .default_logger_name
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let logger = self.build_logger(&name);
        logger.register_sink(Arc::new(ConsoleSink::new()));
        self.registry().insert(&name, logger);
    }

    /// Best-effort teardown from any state; used by the drop path
    fn shutdown_all(&self) {
        if self.state() == ManagerState::ShutDown {
            return;
        }
        let _ = self.transition(ManagerState::Running, ManagerState::ShuttingDown);

        let workers = self
            .worker_pool
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(workers) = workers {
            workers.shutdown(true, DEFAULT_SHUTDOWN_TIMEOUT);
        }

        if let Some(registry) = self.registry.get() {
            registry.clear();
        }
        self.global_sinks.clear();

        self.state
            .store(ManagerState::ShutDown as u8, Ordering::Release);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn test_initialize_creates_default_logger() {
        let manager = LogManager::new();
        assert_eq!(manager.state(), ManagerState::Uninitialized);

        manager.initialize().unwrap();
        assert_eq!(manager.state(), ManagerState::Running);
        assert!(manager.has_logger(DEFAULT_LOGGER_NAME));
        assert!(manager.thread_pool_size() >= 1);
    }

    #[test]
    fn test_initialize_is_call_once() {
        let manager = LogManager::new();
        assert!(manager.initialize().is_ok());
        // Same outcome, no second construction
        assert!(manager.initialize().is_ok());
        assert_eq!(manager.state(), ManagerState::Running);
    }

    #[test]
    fn test_shutdown_twice_errors_without_double_free() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        manager.shutdown(true, Duration::from_secs(5)).unwrap();
        assert_eq!(manager.state(), ManagerState::ShutDown);

        let second = manager.shutdown(true, Duration::from_secs(5));
        assert_eq!(
            second,
            Err(Error::InvalidState {
                expected: ManagerState::Running,
                actual: ManagerState::ShutDown,
            })
        );
    }

    #[test]
    fn test_register_before_initialize_fails() {
        let manager = LogManager::new();
        let result = manager.register_logger("early");
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_empty_logger_name_rejected() {
        let manager = LogManager::new();
        manager.initialize().unwrap();
        assert!(matches!(
            manager.register_logger(""),
            Err(Error::EmptyLoggerName)
        ));
    }

    #[test]
    fn test_get_logger_is_idempotent() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        let first = manager.get_logger("channel").unwrap();
        let second = manager.get_logger("channel").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_logger_after_shutdown_errors() {
        let manager = LogManager::new();
        manager.initialize().unwrap();
        manager.shutdown(true, Duration::from_secs(5)).unwrap();

        assert!(manager.get_logger("late").is_err());
    }

    #[test]
    fn test_remove_logger_protects_default() {
        let manager = LogManager::new();
        manager.initialize().unwrap();
        manager.register_logger("victim").unwrap();

        assert!(manager.remove_logger("victim"));
        assert!(!manager.has_logger("victim"));
        assert!(!manager.remove_logger(DEFAULT_LOGGER_NAME));
        assert!(manager.has_logger(DEFAULT_LOGGER_NAME));
    }

    #[test]
    fn test_global_sinks_attach_to_new_loggers_only() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        let before = manager.register_logger("before").unwrap();
        let sink = Arc::new(MemorySink::new());
        manager.register_sink(sink);
        let after = manager.register_logger("after").unwrap();

        // The default console sink is not involved here
        assert_eq!(before.sinks().len(), 0);
        assert_eq!(after.sinks().len(), 1);
    }

    #[test]
    fn test_defaults_propagate_to_new_loggers() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        let version = manager.config_version();
        manager.set_default_level(Level::Warn);
        manager.set_default_format(LogFormat::Json);
        assert_eq!(manager.config_version(), version + 2);

        let logger = manager.register_logger("configured").unwrap();
        assert_eq!(logger.level(), Level::Warn);
        assert_eq!(logger.format().kind(), LogFormat::Json);
    }

    #[test]
    fn test_set_default_logger_name_creates_logger() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        manager.set_default_logger_name("root");
        assert_eq!(manager.default_logger_name(), "root");
        assert!(manager.has_logger("root"));
        assert!(!manager.remove_logger("root"));
    }

    #[test]
    fn test_resize_thread_pool() {
        let manager = LogManager::new();
        manager.initialize().unwrap();

        assert!(manager.resize_thread_pool(3));
        assert_eq!(manager.thread_pool_size(), 3);

        manager.set_thread_pool_size(1);
        assert_eq!(manager.thread_pool_size(), 1);

        manager.shutdown(true, Duration::from_secs(5)).unwrap();
        assert!(!manager.resize_thread_pool(2));
    }

    #[test]
    fn test_drop_performs_best_effort_shutdown() {
        let manager = LogManager::new();
        manager.initialize().unwrap();
        let logger = manager.get_logger("held").unwrap();
        drop(manager);

        // The held handle is still safe; the record is dropped, not leaked
        assert!(logger.info("after teardown"));
    }
}
