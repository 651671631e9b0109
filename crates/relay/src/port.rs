//! In-process channel pipes.
//!
//! A channel is a pair of [`Port`]s sharing one [`ChannelName`].  Each port
//! can post to the other end and read what the other end posted.  Sends
//! never block and preserve order within the channel.

use odd_domain::{Error, Result};
use odd_protocol::{ChannelName, Envelope};
use tokio::sync::mpsc;

/// Inbound half of a port.
pub type PortReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Cloneable outbound half of a port.
#[derive(Debug, Clone)]
pub struct PortSender {
    name: ChannelName,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl PortSender {
    pub fn name(&self) -> ChannelName {
        self.name
    }

    /// Post an envelope to the other end.  Fails only if the other end has
    /// been dropped.
    pub fn post(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| Error::ChannelClosed(self.name.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both senders feed the same receiver.
    pub fn same_channel(&self, other: &PortSender) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// One end of a named channel.
#[derive(Debug)]
pub struct Port {
    sender: PortSender,
    receiver: PortReceiver,
}

impl Port {
    /// Create both ends of a channel named `name`.
    pub fn pair(name: ChannelName) -> (Port, Port) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Port {
            sender: PortSender { name, tx: b_tx },
            receiver: a_rx,
        };
        let b = Port {
            sender: PortSender { name, tx: a_tx },
            receiver: b_rx,
        };
        (a, b)
    }

    pub fn name(&self) -> ChannelName {
        self.sender.name
    }

    pub fn sender(&self) -> PortSender {
        self.sender.clone()
    }

    pub fn post(&self, envelope: Envelope) -> Result<()> {
        self.sender.post(envelope)
    }

    /// Wait for the next envelope.  `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

/// Opens channels to the relay, the in-process analogue of an extension
/// context calling `connect(name)`.
pub trait ChannelOpener: Send + Sync {
    /// Open a channel under `name` and return the caller's end.  The relay
    /// end is registered before this returns.
    fn open(&self, name: ChannelName) -> Port;
}
