//! Real-time progress fan-out for import queue items.
//!
//! Producers publish [`ProgressEvent`]s; subscribers receive an initial
//! snapshot of in-flight items followed by every later event, through
//! a broadcast channel whose lagging receivers lose their oldest events.

mod broadcaster;
mod events;

pub use broadcaster::{ProgressBroadcaster, ProgressStream, Subscription};
pub use events::{ImportPhase, ProgressEnvelope, ProgressEvent, StreamFrame};
