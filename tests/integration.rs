//! End-to-end pipeline tests: producers, workers, sinks, lifecycle

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use logforge::{
    Format, Level, LogManager, Logger, MemorySink, Message, MessagePool, Sink, WorkerPool,
};

/// Sink that parks the worker on its first record until released, so later
/// records pile up in the queue and drain in priority order.
struct GateSink {
    records: Mutex<Vec<String>>,
    started: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
    gated: AtomicUsize,
}

impl Sink for GateSink {
    fn output(&self, message: &Message, _format: &Format) {
        if self.gated.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.records
            .lock()
            .unwrap()
            .push(message.text().to_string());
    }
}

#[test]
fn single_worker_drains_by_priority() {
    let pool = Arc::new(MessagePool::new());
    let workers = Arc::new(WorkerPool::new(1, Arc::clone(&pool)));
    let logger = Logger::new("t", Level::Trace, Arc::clone(&pool), Arc::clone(&workers));

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let sink = Arc::new(GateSink {
        records: Mutex::new(Vec::new()),
        started: started_tx,
        release: Mutex::new(release_rx),
        gated: AtomicUsize::new(0),
    });
    logger.register_sink(sink.clone());

    // Park the single worker, then queue three records of rising level
    assert!(logger.info("gate"));
    started_rx.recv().unwrap();

    assert!(logger.info("a"));
    assert!(logger.warn("b"));
    assert!(logger.error("c"));
    release_tx.send(()).unwrap();

    workers.flush(Duration::from_secs(5));

    let records = sink.records.lock().unwrap().clone();
    assert_eq!(records, vec!["gate", "c", "b", "a"]);
}

#[test]
fn two_producers_two_workers_deliver_all_records() {
    let manager = LogManager::new();
    manager.initialize().unwrap();
    manager.resize_thread_pool(2);

    let logger = manager.register_logger("t").unwrap();
    logger.set_level(Level::Trace);
    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    let mut producers = vec![];
    for producer_id in 0..2 {
        let logger = Arc::clone(&logger);
        producers.push(thread::spawn(move || {
            for i in 0..1_000 {
                assert!(logger.info(&format!("p{producer_id}-{i}")));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    manager.shutdown(true, Duration::from_secs(10)).unwrap();
    assert_eq!(sink.count(), 2_000);
}

#[test]
fn pool_exhaustion_drops_records_without_corrupt_views() {
    let pool = Arc::new(MessagePool::with_capacity(4));
    pool.set_growth_enabled(false);
    let workers = Arc::new(WorkerPool::new(1, Arc::clone(&pool)));
    let logger = Logger::new("t", Level::Trace, Arc::clone(&pool), Arc::clone(&workers));

    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    let mut producers = vec![];
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        let logger = Arc::clone(&logger);
        producers.push(thread::spawn(move || {
            // Hold every record this thread can reach, then burst
            let mut held = vec![];
            while let Some(msg) = pool.acquire() {
                held.push(msg);
            }
            for i in 0..10 {
                logger.info(&format!("burst-{i}"));
            }
            thread::sleep(Duration::from_millis(100));
            for msg in held {
                pool.release(msg);
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    workers.flush(Duration::from_secs(5));
    workers.shutdown(true, Duration::from_secs(5));

    assert!(logger.dropped_message_count() > 0);
    // Every record a sink observed carried a valid payload
    for record in sink.records() {
        assert!(record.contains("burst-"));
    }
    assert_eq!(
        logger.processed_count() + logger.dropped_message_count(),
        8 * 10
    );
}

#[test]
fn registry_concurrent_get_logger_yields_distinct_loggers() {
    let manager = Arc::new(LogManager::new());
    manager.initialize().unwrap();

    // Four overlapping windows covering L_0..L_99
    let windows = [(0, 40), (20, 60), (40, 80), (60, 100)];
    let mut threads = vec![];
    for (start, end) in windows {
        let manager = Arc::clone(&manager);
        threads.push(thread::spawn(move || {
            for i in start..end {
                let logger = manager.get_logger(&format!("L_{i}")).unwrap();
                assert_eq!(logger.name(), format!("L_{i}"));
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    for i in 0..100 {
        assert!(manager.has_logger(&format!("L_{i}")));
    }
    // The 100 named loggers plus the default one
    assert_eq!(manager.logger_count(), 101);
}

#[test]
fn shutdown_with_wait_flushes_everything() {
    let manager = LogManager::new();
    manager.initialize().unwrap();

    let logger = manager.register_logger("t").unwrap();
    logger.set_level(Level::Trace);
    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    for i in 0..10_000 {
        assert!(logger.info(&format!("record-{i}")));
    }

    manager.shutdown(true, Duration::from_secs(10)).unwrap();
    assert_eq!(sink.count(), 10_000);

    assert!(manager.get_logger("t").is_err());
}

#[test]
fn level_filter_passes_exactly_warn_and_above() {
    let manager = LogManager::new();
    manager.initialize().unwrap();

    let logger = manager.register_logger("t").unwrap();
    logger.set_level(Level::Warn);
    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    logger.trace("trace");
    logger.debug("debug");
    logger.info("info");
    logger.warn("warn");
    logger.error("error");
    logger.fatal("fatal");

    manager.shutdown(true, Duration::from_secs(5)).unwrap();

    let mut levels = sink.levels();
    levels.sort();
    assert_eq!(levels, vec![Level::Warn, Level::Error, Level::Fatal]);
}

#[test]
fn json_format_flows_through_pipeline() {
    let manager = LogManager::new();
    manager.initialize().unwrap();
    manager.set_default_format(logforge::LogFormat::Json);

    let logger = manager.register_logger("json-channel").unwrap();
    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    logforge::log_structured!(
        logger,
        Level::Warn,
        "queue pressure",
        "depth" => 512_i64,
    );

    manager.shutdown(true, Duration::from_secs(5)).unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&records[0]).unwrap();
    assert_eq!(value["level"], "WARN");
    assert_eq!(value["logger"], "json-channel");
    assert_eq!(value["message"], "queue pressure");
    assert_eq!(value["fields"]["depth"], 512);
    assert!(value["source"]["file"]
        .as_str()
        .unwrap()
        .ends_with("integration.rs"));
}

#[test]
fn logger_survives_manager_teardown() {
    let manager = LogManager::new();
    manager.initialize().unwrap();
    let logger = manager.get_logger("survivor").unwrap();
    manager.shutdown(true, Duration::from_secs(5)).unwrap();
    drop(manager);

    // Records are dropped, not processed, and nothing crashes
    assert!(logger.info("into the void"));
}

#[test]
fn worker_resize_under_load_loses_nothing() {
    let manager = LogManager::new();
    manager.initialize().unwrap();
    manager.resize_thread_pool(4);

    let logger = manager.register_logger("resized").unwrap();
    logger.set_level(Level::Trace);
    let sink = Arc::new(MemorySink::new());
    logger.register_sink(sink.clone());

    let producer = {
        let logger = Arc::clone(&logger);
        thread::spawn(move || {
            for i in 0..2_000 {
                assert!(logger.info(&format!("r-{i}")));
            }
        })
    };

    manager.resize_thread_pool(1);
    manager.resize_thread_pool(3);
    producer.join().unwrap();

    manager.shutdown(true, Duration::from_secs(10)).unwrap();
    assert_eq!(sink.count(), 2_000);
}
