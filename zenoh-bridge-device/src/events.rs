//! Outbound event sink of one client.

use telebridge_common::{BridgeEvent, SessionState};
use tokio::sync::mpsc;

/// Cloneable handle pushing events towards one client.
///
/// Emitting never fails: events for a client that has gone away are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the publisher drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped, client gone");
        }
    }

    pub fn status(&self, state: SessionState, message: impl Into<String>) {
        self.emit(BridgeEvent::status(state, message));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
