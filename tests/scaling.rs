//! Scaling tests with many clients and threads on one file-backed store.
//!
//! Measures and checks:
//! - Fan-out of a burst of events to many subscribers
//! - Concurrent emitters and listeners with interleaved sweeps
//! - Several independently opened backends on one database file

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use yapper::{Backend, Broker, ClientId, SqliteBackend, SqliteLocation};

const PATIENCE: Duration = Duration::from_secs(30);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn file_backend(dir: &TempDir, pool_size: u32) -> Arc<dyn Backend> {
    let location = SqliteLocation::File(dir.path().join("broker.db"));
    Arc::new(SqliteBackend::open(location, pool_size).unwrap())
}

fn started(backend: &Arc<dyn Backend>, id: &str) -> Broker {
    let broker = Broker::with_backend(ClientId::new(id).unwrap(), Arc::clone(backend));
    broker.start().unwrap();
    broker
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.elapsed_ms();
        println!(
            "  {} took {:.2}ms ({} items, {:.0} items/sec)",
            self.name,
            ms,
            count,
            if ms > 0.0 { count as f64 / (ms / 1000.0) } else { 0.0 }
        );
    }
}

// --- Fan-out ---

#[test]
fn test_fan_out_to_many_subscribers() {
    init_tracing();
    const CONSUMERS: usize = 20;
    const EVENTS: usize = 200;

    let dir = TempDir::new().unwrap();
    let backend = file_backend(&dir, 4);
    let producer = started(&backend, "producer");
    let consumers: Vec<Broker> = (0..CONSUMERS)
        .map(|i| {
            let broker = started(&backend, &format!("consumer-{}", i));
            broker.subscribe("news").unwrap();
            broker
        })
        .collect();

    let timer = Timer::new("emit");
    for seq in 0..EVENTS {
        let publication = producer.emit("news", json!({ "seq": seq })).unwrap();
        assert_eq!(publication.recipients.len(), CONSUMERS);
    }
    timer.report_with_count(EVENTS);

    let timer = Timer::new("listen");
    for consumer in &consumers {
        let seqs: Vec<u64> = consumer
            .listen()
            .unwrap()
            .iter()
            .map(|e| e.data["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, (0..EVENTS as u64).collect::<Vec<_>>());
    }
    timer.report_with_count(EVENTS * CONSUMERS);

    assert_eq!(producer.sweep().unwrap().events_removed, EVENTS as u64);
    assert_eq!(backend.event_count().unwrap(), 0);
}

// --- Concurrency ---

#[test]
fn test_concurrent_emitters_and_listeners() {
    init_tracing();
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 100;
    let total = PRODUCERS * PER_PRODUCER as usize;

    let dir = TempDir::new().unwrap();
    let backend = file_backend(&dir, 8);

    // Subscribe everyone before the first emit so nobody misses anything.
    let consumers: Vec<Broker> = (0..CONSUMERS)
        .map(|i| {
            let broker = started(&backend, &format!("worker-{}", i));
            broker.subscribe("work").unwrap();
            broker
        })
        .collect();
    let producers: Vec<Broker> = (0..PRODUCERS)
        .map(|i| started(&backend, &format!("producer-{}", i)))
        .collect();

    let timer = Timer::new("concurrent emit/listen");
    let emitters: Vec<_> = producers
        .into_iter()
        .enumerate()
        .map(|(p, broker)| {
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    broker
                        .emit("work", json!({ "producer": p, "seq": seq }))
                        .unwrap();
                }
            })
        })
        .collect();

    let listeners: Vec<_> = consumers
        .into_iter()
        .map(|broker| {
            thread::spawn(move || {
                let deadline = Instant::now() + PATIENCE;
                let mut received = Vec::new();
                while received.len() < total && Instant::now() < deadline {
                    let batch = broker.listen().unwrap();
                    if batch.is_empty() {
                        thread::sleep(Duration::from_millis(2));
                    }
                    received.extend(batch);
                    // Sweeps race with emits on other threads.
                    broker.sweep().unwrap();
                }
                received
            })
        })
        .collect();

    for emitter in emitters {
        emitter.join().unwrap();
    }
    let results: Vec<_> = listeners.into_iter().map(|l| l.join().unwrap()).collect();
    timer.report_with_count(total * CONSUMERS);

    for received in results {
        assert_eq!(received.len(), total);
        assert!(received.windows(2).all(|w| w[0].id < w[1].id));

        // Each producer's events arrive in the order it emitted them.
        let mut last_seq: HashMap<u64, u64> = HashMap::new();
        for event in &received {
            let producer = event.data["producer"].as_u64().unwrap();
            let seq = event.data["seq"].as_u64().unwrap();
            if let Some(prev) = last_seq.insert(producer, seq) {
                assert_eq!(seq, prev + 1);
            }
        }
        assert_eq!(last_seq.len(), PRODUCERS);
    }

    let sweeper = started(&backend, "sweeper");
    sweeper.sweep().unwrap();
    assert_eq!(backend.event_count().unwrap(), 0);
}

#[test]
fn test_unsubscribe_under_load() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = file_backend(&dir, 4);

    let leaver = started(&backend, "leaver");
    let stayer = started(&backend, "stayer");
    leaver.subscribe("feed").unwrap();
    stayer.subscribe("feed").unwrap();
    let producer = started(&backend, "producer");

    let emitter = thread::spawn(move || {
        for seq in 0..200u64 {
            producer.emit("feed", json!({ "seq": seq })).unwrap();
        }
    });

    thread::sleep(Duration::from_millis(5));
    leaver.unsubscribe("*").unwrap();
    emitter.join().unwrap();

    // Nothing emitted after the unsubscribe can reach the leaver.
    assert!(leaver.listen().unwrap().is_empty());
    assert_eq!(stayer.listen().unwrap().len(), 200);

    stayer.sweep().unwrap();
    assert_eq!(backend.event_count().unwrap(), 0);
}

// --- Independent Opens ---

#[test]
fn test_separately_opened_backends_share_one_file() {
    init_tracing();
    const PROCESSES: usize = 6;
    const EVENTS: usize = 50;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broker.db");

    // One backend per "process", each with its own pool.
    let brokers: Vec<Broker> = (0..PROCESSES)
        .map(|i| {
            let backend: Arc<dyn Backend> = Arc::new(
                SqliteBackend::open(SqliteLocation::File(path.clone()), 2).unwrap(),
            );
            let broker = started(&backend, &format!("proc-{}", i));
            broker.subscribe("broadcast").unwrap();
            broker
        })
        .collect();

    let handles: Vec<_> = brokers
        .into_iter()
        .enumerate()
        .map(|(i, broker)| {
            thread::spawn(move || {
                for seq in 0..EVENTS {
                    broker
                        .emit("broadcast", json!({ "from": i, "seq": seq }))
                        .unwrap();
                }
                broker
            })
        })
        .collect();
    let brokers: Vec<Broker> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for broker in &brokers {
        // Every process was subscribed before any emit, its own included.
        assert_eq!(broker.listen().unwrap().len(), PROCESSES * EVENTS);
    }
    for broker in &brokers {
        broker.stop().unwrap();
    }
    assert_eq!(brokers[0].backend().event_count().unwrap(), 0);
}
