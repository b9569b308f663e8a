//! End-to-end scenarios over the full stack: sqlite store, operation queue,
//! orchestrator, scripted remote, and the live event channel.

mod live_channel;
