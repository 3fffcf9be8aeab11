//! Broker facade tying all components together.

use crate::backend::{self, Backend};
use crate::config::BrokerConfig;
use crate::delivery::DeliveryTracker;
use crate::dispatch::{EventHandler, HandlerRegistry, StopHandle, StopSignal, Wake};
use crate::error::{BrokerError, Result};
use crate::event_log::EventLog;
use crate::registry::{SubscriptionRegistry, Unsubscribed};
use crate::sweep::{SweepStats, Sweeper};
use crate::types::{ClientId, Event, Label, LabelSelector, Publication};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default sleep between dispatch-loop polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle of a broker client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerState {
    Stopped,
    Running,
}

/// A client of the shared broker store.
///
/// Provides a unified interface for:
/// - Subscribing to and unsubscribing from labels
/// - Emitting events to every current subscriber
/// - Listening for events delivered since the last listen
/// - Running a polling loop that feeds registered handlers
///
/// All delivery state lives in the store; nothing is cached in process, so
/// any number of brokers (in one process or many) can share a backend.
pub struct Broker {
    client_id: ClientId,
    backend: Arc<dyn Backend>,

    registry: SubscriptionRegistry,
    log: EventLog,
    delivery: DeliveryTracker,
    sweeper: Sweeper,

    handlers: HandlerRegistry,
    state: Mutex<BrokerState>,

    /// Set while `run` occupies a thread.
    dispatching: AtomicBool,
    stop_signal: StopSignal,
    poll_interval: Duration,
}

impl Broker {
    /// Validate `config` and connect to its backend.
    ///
    /// Configuration errors are reported before the store is touched.
    pub fn connect(config: BrokerConfig) -> Result<Self> {
        let client_id = config.validate()?;
        let backend = backend::open(&config.backend, config.pool_size)?;
        Ok(Self::with_backend(client_id, backend).with_poll_interval(config.poll_interval))
    }

    /// Build a broker on an already-open backend, e.g. one shared with other
    /// brokers in the same process.
    pub fn with_backend(client_id: ClientId, backend: Arc<dyn Backend>) -> Self {
        Self {
            client_id,
            registry: SubscriptionRegistry::new(Arc::clone(&backend)),
            log: EventLog::new(Arc::clone(&backend)),
            delivery: DeliveryTracker::new(Arc::clone(&backend)),
            sweeper: Sweeper::new(Arc::clone(&backend)),
            backend,
            handlers: HandlerRegistry::new(),
            state: Mutex::new(BrokerState::Stopped),
            dispatching: AtomicBool::new(false),
            stop_signal: StopSignal::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn state(&self) -> BrokerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BrokerState::Running
    }

    // --- Lifecycle ---

    /// Ensure the schema exists and enter `Running`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.backend.ensure_schema()?;
        *state = BrokerState::Running;
        info!(client = %self.client_id, backend = %self.backend.kind(), "broker started");
        Ok(())
    }

    /// Drain pending events, drop every subscription, sweep, enter `Stopped`.
    ///
    /// Drained events are discarded, not dispatched. No-op if not running.
    /// On a storage error the broker stays `Running` so the stop can be retried.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == BrokerState::Stopped {
            return Ok(());
        }

        let drained = self.delivery.take(&self.client_id)?;
        let unsubscribed = self.registry.unsubscribe(&self.client_id, &LabelSelector::All)?;
        self.sweeper.sweep()?;
        *state = BrokerState::Stopped;
        drop(state);

        if self.dispatching.load(Ordering::SeqCst) {
            self.stop_signal.notify();
        }
        info!(
            client = %self.client_id,
            discarded = drained.len(),
            subscriptions = unsubscribed.subscriptions,
            "broker stopped"
        );
        Ok(())
    }

    // --- Client Operations ---

    /// Subscribe this client to `label`. Subscribing twice is a no-op.
    pub fn subscribe(&self, label: &str) -> Result<()> {
        let label = Label::new(label)?;
        self.registry.subscribe(&self.client_id, &label)?;
        Ok(())
    }

    /// Unsubscribe from `label`, or from everything with `"*"`, then sweep.
    pub fn unsubscribe(&self, label: &str) -> Result<Unsubscribed> {
        let selector = LabelSelector::parse(label)?;
        self.registry.unsubscribe(&self.client_id, &selector)
    }

    /// Labels this client is currently subscribed to.
    pub fn subscriptions(&self) -> Result<Vec<Label>> {
        self.registry.labels_of(&self.client_id)
    }

    /// Emit an event to every client currently subscribed to `label`.
    ///
    /// `None` (or `Value::Null`) emits an empty object. Never waits for
    /// consumers; succeeds even if nobody is subscribed.
    pub fn emit(&self, label: &str, data: impl Into<Option<Value>>) -> Result<Publication> {
        let label = Label::new(label)?;
        let data = data.into().unwrap_or(Value::Null);
        let publication = self.log.append(&label, &data)?;
        debug!(
            client = %self.client_id,
            label = %label,
            event = %publication.event_id,
            recipients = publication.recipients.len(),
            "emit"
        );
        Ok(publication)
    }

    /// Take every event delivered to this client since its last listen,
    /// in emission order. Returns immediately; empty if nothing is pending.
    pub fn listen(&self) -> Result<Vec<Event>> {
        self.delivery.take(&self.client_id)
    }

    /// Number of events waiting for this client.
    pub fn pending(&self) -> Result<u64> {
        self.delivery.pending(&self.client_id)
    }

    /// Reclaim events no client still needs.
    pub fn sweep(&self) -> Result<SweepStats> {
        self.sweeper.sweep()
    }

    // --- Handlers & Dispatch ---

    /// Register the handler for `label` (replacing any previous one) and
    /// subscribe to it.
    pub fn on_event<H>(&self, label: &str, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        let label = Label::new(label)?;
        self.registry.subscribe(&self.client_id, &label)?;
        self.handlers.register(label, Arc::new(handler));
        Ok(())
    }

    /// Remove the handler for `label` and unsubscribe from it. Returns false
    /// if no handler was registered.
    pub fn off_event(&self, label: &str) -> Result<bool> {
        let label = Label::new(label)?;
        let removed = self.handlers.remove(&label).is_some();
        self.registry
            .unsubscribe(&self.client_id, &LabelSelector::One(label))?;
        Ok(removed)
    }

    /// Labels with a registered handler, sorted.
    pub fn handled_labels(&self) -> Vec<Label> {
        self.handlers.labels()
    }

    /// Invoke the registered handler for the event's label. Returns false if
    /// there is none; the event is then dropped.
    pub fn handle_event(&self, event: &Event) -> bool {
        let handled = self.handlers.dispatch(event);
        if !handled {
            debug!(client = %self.client_id, label = %event.label, event = %event.id, "no handler, dropped");
        }
        handled
    }

    /// One iteration of the dispatch loop: listen, then hand each event to
    /// its handler. Returns the number of events taken.
    pub fn poll_once(&self) -> Result<usize> {
        let events = self.listen()?;
        for event in &events {
            self.handle_event(event);
        }
        Ok(events.len())
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_signal.handle()
    }

    /// Poll and dispatch on the calling thread until stopped.
    ///
    /// Starts the broker if needed. Returns when `stop` is called (from a
    /// handler or another thread) or when a [`StopHandle`] fires; in the
    /// latter case the full stop sequence runs before returning. Storage
    /// errors end the loop and are returned; the broker is left running.
    pub fn run(&self) -> Result<()> {
        if self.dispatching.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::InvalidState(
                "dispatch loop already running".to_string(),
            ));
        }
        let _guard = DispatchGuard { broker: self };

        if !self.is_running() {
            self.start()?;
        }

        info!(client = %self.client_id, poll_interval = ?self.poll_interval, "dispatch loop entered");
        let result = self.dispatch_until_stopped();
        match &result {
            Ok(()) => info!(client = %self.client_id, "dispatch loop exited"),
            Err(e) => warn!(client = %self.client_id, error = %e, "dispatch loop aborted"),
        }
        result
    }

    fn dispatch_until_stopped(&self) -> Result<()> {
        while self.is_running() {
            self.poll_once()?;

            if !self.is_running() {
                break;
            }
            match self.stop_signal.wait(self.poll_interval) {
                Wake::StopRequested => {
                    self.stop()?;
                    break;
                }
                // A nudge from `stop`; the loop condition decides.
                Wake::Nudge | Wake::Timeout => {}
            }
        }
        Ok(())
    }
}

/// Clears the dispatching flag and any leftover wake-up when `run` returns.
struct DispatchGuard<'a> {
    broker: &'a Broker,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.broker.stop_signal.clear();
        self.broker.dispatching.store(false, Ordering::SeqCst);
    }
}
