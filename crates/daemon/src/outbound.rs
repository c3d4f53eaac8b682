//! Bounded per-subscriber outbound queue.
//!
//! The acquisition loop pushes without ever waiting. When the queue is full the
//! oldest message is evicted to make room. The connection's writer task
//! drains the queue at its own pace. A sender can also hang up, which tells
//! the writer to drop the connection without flushing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A serialized JSON message, shared across every queue it is pushed to.
pub type OutboundMessage = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outbound queue closed by the connection")]
pub struct QueueClosed;

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full; the oldest message was evicted.
    DroppedOldest,
}

struct Shared {
    queue: ArrayQueue<OutboundMessage>,
    notify: Notify,
    sender_closed: AtomicBool,
    receiver_closed: AtomicBool,
    hangup: CancellationToken,
}

pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity.max(1)),
        notify: Notify::new(),
        sender_closed: AtomicBool::new(false),
        receiver_closed: AtomicBool::new(false),
        hangup: CancellationToken::new(),
    });
    (
        OutboundSender {
            shared: shared.clone(),
        },
        OutboundReceiver { shared },
    )
}

/// Producer half, held by the session registry.
pub struct OutboundSender {
    shared: Arc<Shared>,
}

impl OutboundSender {
    pub fn push(&self, message: OutboundMessage) -> Result<Delivery, QueueClosed> {
        if self.is_closed() {
            return Err(QueueClosed);
        }
        let delivery = match self.shared.queue.force_push(message) {
            None => Delivery::Queued,
            Some(_evicted) => Delivery::DroppedOldest,
        };
        self.shared.notify.notify_one();
        Ok(delivery)
    }

    /// True once the receiving connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_closed.load(Ordering::Acquire)
    }

    /// Marks the stream finished. The receiver drains what is queued, then
    /// sees the end.
    pub fn close(&self) {
        self.shared.sender_closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    /// Ends the stream immediately. Queued messages are discarded and the
    /// writer is expected to drop the socket, even mid-send.
    pub fn hang_up(&self) {
        self.shared.hangup.cancel();
        self.close();
    }
}

impl Drop for OutboundSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half, held by the connection's writer task.
pub struct OutboundReceiver {
    shared: Arc<Shared>,
}

impl OutboundReceiver {
    /// Waits for the next message. Returns `None` once the sender has closed
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            if self.shared.hangup.is_cancelled() {
                return None;
            }
            if let Some(message) = self.shared.queue.pop() {
                return Some(message);
            }
            if self.shared.sender_closed.load(Ordering::Acquire) {
                return self.shared.queue.pop();
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.shared.queue.pop()
    }

    /// Fires when the sender hangs up.
    pub fn hangup(&self) -> CancellationToken {
        self.shared.hangup.clone()
    }
}

impl Drop for OutboundReceiver {
    fn drop(&mut self) {
        self.shared.receiver_closed.store(true, Ordering::Release);
    }
}
