//! In-process channel pair.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::EventChannel;
use crate::error::{OutpostError, Result};
use crate::model::SyncEvent;

/// One end of an in-memory event channel.
///
/// [`LocalChannel::pair`] cross-wires two ends: what one side sends, the
/// other receives. Useful for tests and for wiring two orchestrators in one
/// process.
pub struct LocalChannel {
    inbound: mpsc::Receiver<SyncEvent>,
    outbound: mpsc::Sender<SyncEvent>,
    closed: bool,
}

impl LocalChannel {
    /// Two connected ends with the given buffer per direction.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::channel(capacity);
        let (right_tx, right_rx) = mpsc::channel(capacity);
        (
            Self {
                inbound: left_rx,
                outbound: right_tx,
                closed: false,
            },
            Self {
                inbound: right_rx,
                outbound: left_tx,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl EventChannel for LocalChannel {
    async fn next_event(&mut self) -> Result<Option<SyncEvent>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, event: &SyncEvent) -> Result<()> {
        self.outbound
            .send(event.clone())
            .await
            .map_err(|_| OutpostError::Channel("peer end closed".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }
}
