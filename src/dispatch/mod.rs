//! Handler dispatch for the polling loop.
//!
//! This module provides the in-process side of event consumption:
//! - A label → handler map with last-registration-wins semantics
//! - A stop channel so the dispatch loop can be cancelled from another thread
//!
//! # Example
//!
//! ```ignore
//! let broker = Arc::new(Broker::connect(config)?);
//!
//! broker.on_event("orders", |event: &Event| {
//!     println!("order: {}", event.data);
//! })?;
//!
//! let stop = broker.stop_handle();
//! let worker = {
//!     let broker = Arc::clone(&broker);
//!     std::thread::spawn(move || broker.run())
//! };
//!
//! // Later, from any thread:
//! stop.stop();
//! worker.join().unwrap()?;
//! ```

mod handlers;
mod signal;

pub use handlers::{EventHandler, HandlerRegistry};
pub use signal::StopHandle;
pub(crate) use signal::{StopSignal, Wake};
