//! Dispatch loop tests: blocking `run`, cross-thread stop, re-entrant stop.

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use yapper::{Backend, Broker, ClientId, Event, SqliteBackend};

const POLL: Duration = Duration::from_millis(10);
const PATIENCE: Duration = Duration::from_secs(5);

fn shared_memory() -> Arc<dyn Backend> {
    Arc::new(SqliteBackend::in_memory().unwrap())
}

fn broker_on(backend: &Arc<dyn Backend>, id: &str) -> Arc<Broker> {
    let broker = Broker::with_backend(ClientId::new(id).unwrap(), Arc::clone(backend))
        .with_poll_interval(POLL);
    broker.start().unwrap();
    Arc::new(broker)
}

/// Forward every event for `label` into a channel.
fn forward(broker: &Broker, label: &str) -> Receiver<Value> {
    let (tx, rx) = unbounded();
    broker
        .on_event(label, move |event: &Event| {
            let _ = tx.send(event.data.clone());
        })
        .unwrap();
    rx
}

// --- Cross-thread Stop ---

#[test]
fn test_stop_handle_ends_run_from_other_thread() {
    let backend = shared_memory();
    let consumer = broker_on(&backend, "consumer");
    let producer = broker_on(&backend, "producer");
    let received = forward(&consumer, "orders");

    let handle = consumer.stop_handle();
    let runner = {
        let consumer = Arc::clone(&consumer);
        thread::spawn(move || consumer.run())
    };

    producer.emit("orders", json!({"n": 1})).unwrap();
    producer.emit("orders", json!({"n": 2})).unwrap();
    assert_eq!(received.recv_timeout(PATIENCE).unwrap(), json!({"n": 1}));
    assert_eq!(received.recv_timeout(PATIENCE).unwrap(), json!({"n": 2}));

    handle.stop();
    runner.join().unwrap().unwrap();

    assert!(!consumer.is_running());
    assert!(consumer.subscriptions().unwrap().is_empty());
    assert_eq!(backend.event_count().unwrap(), 0);
}

#[test]
fn test_stop_from_other_thread_wakes_loop() {
    let backend = shared_memory();
    // Long interval: only a wake-up can end the loop quickly.
    let broker = Arc::new(
        Broker::with_backend(ClientId::new("c1").unwrap(), Arc::clone(&backend))
            .with_poll_interval(Duration::from_secs(30)),
    );
    broker.start().unwrap();
    let (entered_tx, entered_rx) = unbounded();
    broker
        .on_event("ping", move |_: &Event| {
            let _ = entered_tx.send(());
        })
        .unwrap();
    broker.emit("ping", None).unwrap();

    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };
    entered_rx.recv_timeout(PATIENCE).unwrap();

    let started = Instant::now();
    broker.stop().unwrap();
    runner.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!broker.is_running());
}

#[test]
fn test_stop_handle_before_run_returns_promptly() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    broker.subscribe("a").unwrap();

    broker.stop_handle().stop();
    broker.run().unwrap();

    assert!(!broker.is_running());
    assert!(broker.subscriptions().unwrap().is_empty());
}

#[test]
fn test_repeated_stop_requests_collapse() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");

    let handle = broker.stop_handle();
    handle.stop();
    handle.clone().stop();
    broker.run().unwrap();

    // Nothing stale left over: a fresh run keeps polling until asked again.
    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };
    thread::sleep(POLL * 5);
    assert!(!runner.is_finished());
    handle.stop();
    runner.join().unwrap().unwrap();
}

#[test]
fn test_restart_during_handler_keeps_loop_running() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    broker
        .on_event("slow", move |_: &Event| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(PATIENCE);
        })
        .unwrap();
    broker.emit("slow", None).unwrap();

    let handle = broker.stop_handle();
    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };

    // While the loop is inside the handler: stop, restart, resubscribe.
    entered_rx.recv_timeout(PATIENCE).unwrap();
    broker.stop().unwrap();
    broker.start().unwrap();
    broker.subscribe("keep").unwrap();
    release_tx.send(()).unwrap();

    // The wake-up left behind by `stop` must not stop the restarted broker.
    thread::sleep(POLL * 10);
    assert!(broker.is_running());
    assert_eq!(
        broker.subscriptions().unwrap(),
        vec![yapper::Label::new("keep").unwrap()]
    );
    assert!(!runner.is_finished());

    handle.stop();
    runner.join().unwrap().unwrap();
    assert!(!broker.is_running());
}

// --- Re-entrant Stop ---

#[test]
fn test_handler_can_stop_its_own_broker() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let weak: Weak<Broker> = Arc::downgrade(&broker);
    let sink = Arc::clone(&seen);
    broker
        .on_event("shutdown", move |event: &Event| {
            sink.lock().push(event.id);
            if let Some(broker) = weak.upgrade() {
                broker.stop().unwrap();
            }
        })
        .unwrap();
    broker.emit("shutdown", None).unwrap();

    broker.run().unwrap();

    assert_eq!(seen.lock().len(), 1);
    assert!(!broker.is_running());
    assert!(broker.subscriptions().unwrap().is_empty());
}

#[test]
fn test_batch_completes_after_handler_stops() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    let later = forward(&broker, "later");

    let weak = Arc::downgrade(&broker);
    broker
        .on_event("shutdown", move |_: &Event| {
            if let Some(broker) = weak.upgrade() {
                broker.stop().unwrap();
            }
        })
        .unwrap();
    broker.emit("shutdown", None).unwrap();
    broker.emit("later", json!({"n": 1})).unwrap();

    broker.run().unwrap();

    // Both were taken in one batch, so the second is still dispatched.
    assert!(later.try_recv().is_ok());
    assert_eq!(backend.event_count().unwrap(), 0);
}

// --- Loop Behaviour ---

#[test]
fn test_run_starts_stopped_broker() {
    let backend = shared_memory();
    let broker = Arc::new(
        Broker::with_backend(ClientId::new("c1").unwrap(), Arc::clone(&backend))
            .with_poll_interval(POLL),
    );
    assert!(!broker.is_running());

    let handle = broker.stop_handle();
    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };

    let deadline = Instant::now() + PATIENCE;
    while !broker.is_running() && Instant::now() < deadline {
        thread::sleep(POLL);
    }
    assert!(broker.is_running());

    handle.stop();
    runner.join().unwrap().unwrap();
    assert!(!broker.is_running());
}

#[test]
fn test_unhandled_labels_are_dropped() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    let orders = forward(&broker, "orders");
    broker.subscribe("audit").unwrap();

    broker.emit("audit", json!({"ignored": true})).unwrap();
    broker.emit("orders", json!({"n": 1})).unwrap();

    let handle = broker.stop_handle();
    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };
    assert_eq!(orders.recv_timeout(PATIENCE).unwrap(), json!({"n": 1}));
    assert_eq!(broker.pending().unwrap(), 0);

    handle.stop();
    runner.join().unwrap().unwrap();
}

#[test]
fn test_handler_replacement() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");
    let first = forward(&broker, "orders");
    let second = forward(&broker, "orders");

    broker.emit("orders", json!({"n": 1})).unwrap();
    assert_eq!(broker.poll_once().unwrap(), 1);

    assert!(first.try_recv().is_err());
    assert_eq!(second.try_recv().unwrap(), json!({"n": 1}));
}

#[test]
fn test_broker_can_run_again_after_stop() {
    let backend = shared_memory();
    let broker = broker_on(&backend, "c1");

    broker.stop_handle().stop();
    broker.run().unwrap();
    assert!(!broker.is_running());

    let received = forward(&broker, "orders");
    broker.emit("orders", json!({"n": 2})).unwrap();

    let handle = broker.stop_handle();
    let runner = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.run())
    };
    assert_eq!(received.recv_timeout(PATIENCE).unwrap(), json!({"n": 2}));
    handle.stop();
    runner.join().unwrap().unwrap();
}
