//! Event sink
//!
//! A single bounded mpsc channel fans in events from every connection handler
//! and is drained by exactly one presentation-layer reader. Events from one
//! connection keep the order in which that handler emitted them.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::events::MeshEvent;
use crate::config::ChannelConfig;

pub type EventSender = mpsc::Sender<MeshEvent>;
pub type EventReceiver = mpsc::Receiver<MeshEvent>;

/// Producer half, cloned into every handler
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: EventSender,
}

impl EventSink {
    /// Deliver an event, waiting for buffer space
    ///
    /// Returns false once the consumer has gone away; the mesh keeps running
    /// without a presentation layer.
    pub async fn emit(&self, event: MeshEvent) -> bool {
        match self.sender.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!("Event stream closed, dropping {:?}", event);
                false
            }
        }
    }

    /// Deliver an event only if there is room right now
    ///
    /// For callers that may be running on the consumer's own task, such as a
    /// broadcast or connect issued from the input loop. A full buffer drops
    /// the event instead of waiting for a reader that cannot run.
    pub fn try_emit(&self, event: MeshEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Event buffer full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Event stream closed, dropping {:?}", event);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer half, owned by the presentation layer
#[derive(Debug)]
pub struct EventStream {
    receiver: EventReceiver,
}

impl EventStream {
    /// Next event, or `None` once every sink has been dropped
    pub async fn recv(&mut self) -> Option<MeshEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking poll
    pub fn try_recv(&mut self) -> Option<MeshEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Create the event channel with the configured capacity
pub fn create_event_channel(config: &ChannelConfig) -> (EventSink, EventStream) {
    let (sender, receiver) = mpsc::channel(config.event_buffer_size.max(1));
    (EventSink { sender }, EventStream { receiver })
}
