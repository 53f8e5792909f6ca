//! In-process message bus between the foreground and background actors

use crate::{CoordinationMessage, PrefetchError, Result};
use tokio::sync::mpsc;

/// Sending half of a bus endpoint
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<CoordinationMessage>,
}

impl BusSender {
    /// Deliver a message to the peer
    pub async fn send(&self, message: CoordinationMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| PrefetchError::ChannelClosed)
    }

    /// Check if the peer stopped receiving
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One side of a connected bus
#[derive(Debug)]
pub struct BusEndpoint {
    sender: BusSender,
    rx: mpsc::Receiver<CoordinationMessage>,
}

impl BusEndpoint {
    /// Split into sending and receiving halves
    pub fn split(self) -> (BusSender, mpsc::Receiver<CoordinationMessage>) {
        (self.sender, self.rx)
    }
}

/// Create two connected endpoints, each buffering up to `capacity` messages
pub fn pair(capacity: usize) -> (BusEndpoint, BusEndpoint) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    (
        BusEndpoint {
            sender: BusSender { tx: b_tx },
            rx: a_rx,
        },
        BusEndpoint {
            sender: BusSender { tx: a_tx },
            rx: b_rx,
        },
    )
}
