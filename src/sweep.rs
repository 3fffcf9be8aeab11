//! Garbage collection of the event log.
//!
//! An event is sweep-eligible once no delivery marker references it: every
//! client subscribed at emission time has either listened or unsubscribed.
//! The sweep is the only path that deletes events.

use crate::backend::Backend;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of a sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Event rows deleted.
    pub events_removed: u64,
    /// Wall time spent in the store.
    pub elapsed: Duration,
}

/// Reclaims event rows no client still needs.
#[derive(Clone)]
pub struct Sweeper {
    backend: Arc<dyn Backend>,
}

impl Sweeper {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Delete every event with zero delivery markers.
    ///
    /// Runs as one statement, so the marker set is read once at the moment of
    /// deletion; an emit committing after that point is left alone. Safe to
    /// call at any time from any client.
    pub fn sweep(&self) -> Result<SweepStats> {
        let started = Instant::now();
        let events_removed = self.backend.delete_unreferenced_events()?;
        let stats = SweepStats {
            events_removed,
            elapsed: started.elapsed(),
        };

        if events_removed > 0 {
            info!(removed = events_removed, elapsed = ?stats.elapsed, "swept event log");
        } else {
            debug!(elapsed = ?stats.elapsed, "sweep found nothing to reclaim");
        }
        Ok(stats)
    }
}
