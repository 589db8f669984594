//! Delivery of notifications to the host component.
//!
//! `HostBridge` is the seam between the relay and whatever consumes push
//! messages. `channel()` provides a ready-made bridge backed by a std mpsc
//! channel, with `HostMessages` as the blocking consumer side.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::message::HostMessage;

/// Errors delivering a message to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The host side went away
    #[error("Host disconnected")]
    Disconnected,

    /// The host refused the message
    #[error("Host rejected message: {0}")]
    Rejected(String),
}

/// Receives forwarded push messages.
///
/// `deliver` is called with the relay lock held, so it must not call back
/// into the relay.
pub trait HostBridge: Send + Sync {
    fn deliver(&self, message: &HostMessage) -> Result<(), DeliveryError>;
}

/// Create a channel-backed host bridge and its consumer.
pub fn channel() -> (ChannelHostBridge, HostMessages) {
    let (tx, rx) = mpsc::channel();
    (
        ChannelHostBridge { tx },
        HostMessages {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Host bridge that sends every message into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelHostBridge {
    tx: mpsc::Sender<HostMessage>,
}

impl HostBridge for ChannelHostBridge {
    fn deliver(&self, message: &HostMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(message.clone())
            .map_err(|_| DeliveryError::Disconnected)
    }
}

/// Blocking iterator over delivered host messages
///
/// This iterator blocks on `next()` until a message is available or every
/// bridge is dropped. Use `try_recv()` for non-blocking access.
pub struct HostMessages {
    rx: Arc<Mutex<mpsc::Receiver<HostMessage>>>,
}

impl HostMessages {
    /// Block until a message is available
    ///
    /// Returns `None` if the channel is closed.
    pub fn recv(&self) -> Option<HostMessage> {
        self.rx.lock().ok()?.recv().ok()
    }

    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<HostMessage> {
        self.rx.lock().ok()?.try_recv().ok()
    }

    /// Block until a message is available or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HostMessage> {
        self.rx.lock().ok()?.recv_timeout(timeout).ok()
    }

    /// Non-blocking iterator over currently available messages
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }
}

impl Iterator for HostMessages {
    type Item = HostMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Clone for HostMessages {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

/// Non-blocking iterator over currently available messages
pub struct TryIter<'a> {
    inner: &'a HostMessages,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = HostMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}
