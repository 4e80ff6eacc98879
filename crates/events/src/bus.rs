//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes notifications; it does not store them. Delivery is
//! best-effort fan-out: every live subscription receives a copy of each
//! published message, in publish order for a single publisher. Consumers that
//! forward to clients must tolerate gaps when they subscribe late.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of one subscriber; a websocket forwarder holds one per
/// connected screen and pushes what it receives:
///
/// ```ignore
/// let screen = bus.subscribe_where(|e: &NotificationEnvelope| e.topic() == "loginByCard");
/// while let Ok(envelope) = screen.recv() {
///     socket.send(serde_json::to_string(&envelope)?)?;
/// }
/// ```
///
/// Meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Blocks; errors once the bus is gone.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything already queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// `publish` may fail (a poisoned lock, a broken transport); callers in the
/// reconciliation path log the failure and carry on, since stock state has
/// already been written by then.
pub trait EventBus<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
