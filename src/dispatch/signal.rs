//! Stop channel for the dispatch loop.
//!
//! Two kinds of message share one wake-up channel: a stop *request* from a
//! [`StopHandle`], which the loop answers with the full stop sequence, and a
//! bare wake-up from the broker itself, which only makes the loop re-check
//! the broker state. The request lives in a flag so a pending wake-up can
//! never absorb it, and a wake-up can never be mistaken for it.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cloneable handle that asks a running dispatch loop to stop.
///
/// The loop notices the request between polls, then performs the broker's
/// full stop sequence on its own thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    sender: Sender<()>,
}

impl StopHandle {
    /// Request a stop. Repeated requests collapse into one.
    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // Full means the loop is already due to wake.
        let _ = self.sender.try_send(());
    }
}

/// What ended a [`StopSignal::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The poll interval elapsed.
    Timeout,
    /// Woken without a request; re-check the broker state.
    Nudge,
    /// A [`StopHandle`] asked for a stop.
    StopRequested,
}

/// Receiving side, owned by the broker.
pub(crate) struct StopSignal {
    requested: Arc<AtomicBool>,
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            sender,
            receiver,
        }
    }

    pub(crate) fn handle(&self) -> StopHandle {
        StopHandle {
            requested: Arc::clone(&self.requested),
            sender: self.sender.clone(),
        }
    }

    /// Wake the loop without requesting a stop.
    pub(crate) fn notify(&self) {
        let _ = self.sender.try_send(());
    }

    /// Sleep up to `timeout`, or until woken.
    pub(crate) fn wait(&self, timeout: Duration) -> Wake {
        let woken = match self.receiver.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            // Unreachable while `self.sender` lives.
            Err(RecvTimeoutError::Disconnected) => true,
        };
        if self.requested.swap(false, Ordering::SeqCst) {
            Wake::StopRequested
        } else if woken {
            Wake::Nudge
        } else {
            Wake::Timeout
        }
    }

    /// Discard any pending wake-up or request.
    pub(crate) fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
        self.requested.store(false, Ordering::SeqCst);
    }
}
