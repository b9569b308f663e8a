//! Synchronization: in-process event fan-out and the orchestrator that ties
//! the store, queue, conflicts, and channel together.

pub mod emitter;
pub mod orchestrator;

pub use emitter::{EventEmitter, Subscription};
pub use orchestrator::{SyncOrchestrator, SyncSnapshot};
