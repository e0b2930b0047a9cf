// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging

/// Capture the current call site as a [`SourceLocation`](crate::SourceLocation)
#[macro_export]
macro_rules! source_location {
    () => {
        $crate::SourceLocation::new(file!(), module_path!(), line!())
    };
}

/// Log a formatted message at trace level
///
/// # Examples
/// ```ignore
/// log_trace!(logger, "entering poll cycle {}", cycle);
/// ```
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::TRACE_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Trace, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a formatted message at debug level
///
/// # Examples
/// ```ignore
/// log_debug!(logger, "parsed {} records", count);
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::DEBUG_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Debug, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a formatted message at info level
///
/// # Examples
/// ```ignore
/// log_info!(logger, "listening on {}", addr);
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::LOGGING_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Info, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a formatted message at warn level
///
/// # Examples
/// ```ignore
/// log_warn!(logger, "queue at {}% capacity", pct);
/// ```
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::LOGGING_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Warn, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a formatted message at error level
///
/// # Examples
/// ```ignore
/// log_error!(logger, "bind failed: {}", err);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::LOGGING_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Error, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a formatted message at fatal level
///
/// # Examples
/// ```ignore
/// log_fatal!(logger, "unrecoverable: {}", err);
/// ```
#[macro_export]
macro_rules! log_fatal {
    ($logger:expr, $($arg:tt)+) => {{
        if $crate::LOGGING_ENABLED {
            $logger.log(&format!($($arg)+), $crate::Level::Fatal, $crate::source_location!())
        } else {
            false
        }
    }};
}

/// Log a message with structured fields
///
/// # Examples
/// ```ignore
/// log_structured!(logger, Level::Info, "packet forwarded",
///                 "iface" => "eth0", "bytes" => 1480_i64);
/// ```
#[macro_export]
macro_rules! log_structured {
    ($logger:expr, $level:expr, $msg:expr, $($key:expr => $value:expr),+ $(,)?) => {{
        if $crate::LOGGING_ENABLED {
            let mut data = $crate::StructuredData::new();
            $(data.insert($key, $value);)+
            $logger.log_structured($msg, &data, $level, $crate::source_location!())
        } else {
            false
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::core::message_pool::MessagePool;
    use crate::core::worker_pool::WorkerPool;
    use crate::level::Level;
    use crate::logger::Logger;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_logger() -> (Arc<Logger>, Arc<WorkerPool>) {
        let pool = Arc::new(MessagePool::with_capacity(64));
        let workers = Arc::new(WorkerPool::new(1, Arc::clone(&pool)));
        let logger = Logger::new("macros", Level::Trace, pool, Arc::clone(&workers));
        (logger, workers)
    }

    #[test]
    fn test_level_macros() {
        let (logger, workers) = test_logger();

        assert!(log_trace!(logger, "trace {}", 1));
        assert!(log_debug!(logger, "debug {}", 2));
        assert!(log_info!(logger, "info {}", 3));
        assert!(log_warn!(logger, "warn {}", 4));
        assert!(log_error!(logger, "error {}", 5));
        assert!(log_fatal!(logger, "fatal {}", 6));

        workers.flush(Duration::from_secs(5));
        assert_eq!(logger.processed_count(), 6);
    }

    #[test]
    fn test_structured_macro() {
        let (logger, workers) = test_logger();

        assert!(log_structured!(
            logger,
            Level::Info,
            "packet forwarded",
            "iface" => "eth0",
            "bytes" => 1480_i64,
        ));

        workers.flush(Duration::from_secs(5));
        assert_eq!(logger.processed_count(), 1);
    }

    #[test]
    fn test_source_location_macro() {
        let location = source_location!();
        assert!(location.file.ends_with("macros.rs"));
        assert!(location.module.contains("macros"));
        assert!(location.line > 0);
    }
}
