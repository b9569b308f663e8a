//! Real-time event transport.
//!
//! A channel delivers remote [`SyncEvent`]s into the orchestrator and carries
//! this client's confirmed mutations out to collaborators. The orchestrator
//! only sees the trait; production uses the WebSocket implementation and
//! single-process setups (and tests) use the in-memory pair.

pub mod local;
pub mod websocket;

pub use local::LocalChannel;
pub use websocket::WebSocketChannel;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SyncEvent;

/// Bidirectional stream of sync events.
#[async_trait]
pub trait EventChannel: Send {
    /// Wait for the next inbound event. `Ok(None)` means the peer closed the
    /// channel cleanly; an error means it broke.
    async fn next_event(&mut self) -> Result<Option<SyncEvent>>;

    /// Send one outbound event.
    async fn send(&mut self, event: &SyncEvent) -> Result<()>;

    /// Close the channel. Subsequent `next_event` calls return `Ok(None)`.
    async fn close(&mut self) -> Result<()>;
}
