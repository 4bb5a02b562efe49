//! Event emission.
//!
//! - [`router`] - Channel routing, listeners and sinks
//! - `worker` - Dedicated delivery thread for deferred emission

pub mod router;
mod worker;

pub use router::{EmissionRouter, EventSink, Listener, ListenerId};
