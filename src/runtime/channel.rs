use super::{DmRuntime, RuntimeError, RuntimeEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Runtime that forwards every event into an unbounded channel.
pub struct ChannelRuntime {
    event_tx: RwLock<Option<mpsc::UnboundedSender<RuntimeEvent>>>,
}

impl ChannelRuntime {
    pub fn new(event_tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            event_tx: RwLock::new(Some(event_tx)),
        }
    }

    /// Runtime plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DmRuntime for ChannelRuntime {
    fn emit(&self, event: RuntimeEvent) -> Result<(), RuntimeError> {
        let guard = self.event_tx.read();
        let tx = guard.as_ref().ok_or(RuntimeError::ReceiverClosed)?;
        tx.send(event).map_err(|_| RuntimeError::ReceiverClosed)
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        // Dropping the sender lets the output loop drain and finish
        self.event_tx.write().take();
        Ok(())
    }
}
