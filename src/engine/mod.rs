//! Poll engine module
//!
//! Owns the tracked set between two catalog resolutions and runs one poll
//! cycle per scheduled tick.

mod control;
mod emitter;
mod poll;

pub use control::PollControl;
pub use emitter::{ChannelEmitter, CycleOutcome, CycleSummary, Delivery, Emitter, SubscriberEvent};
pub use poll::{EngineState, PollEngine, DEFAULT_READ_CONCURRENCY, MAX_PASSES_PER_CYCLE};
