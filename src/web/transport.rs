//! Outbound side of a subscriber connection.

use crate::error::{Result, TelemetryError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Notify};

/// Something that can carry text frames to one client.
pub trait Transport: Send + Sync {
    /// Stable id of the underlying connection.
    fn id(&self) -> &str;

    /// Whether a send right now has a chance of reaching the client.
    fn is_open(&self) -> bool;

    fn send_text(&self, text: String) -> Result<()>;

    /// Mark the transport closed. Idempotent.
    fn close(&self);
}

/// Transport backed by an unbounded channel drained by a socket writer task.
pub struct ChannelTransport {
    id: String,
    tx: mpsc::UnboundedSender<String>,
    open: AtomicBool,
    closed: Notify,
}

impl ChannelTransport {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            id: id.into(),
            tx,
            open: AtomicBool::new(true),
            closed: Notify::new(),
        };
        (transport, rx)
    }

    /// Resolves once [`Transport::close`] has been called.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        if !self.open.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send_text(&self, text: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TelemetryError::transport_write_failed(format!(
                "transport {} is closed",
                self.id
            )));
        }
        self.tx.send(text).map_err(|_| {
            TelemetryError::transport_write_failed(format!("writer for {} has gone", self.id))
        })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closed.notify_waiters();
        }
    }
}
