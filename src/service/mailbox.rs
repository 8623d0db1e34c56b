//! # Mailbox
//!
//! Concurrent FIFO holding [`Message`]s for exactly one consumer. Producers
//! share a cloneable [`Mailbox`]; the consumer half ([`MailboxReceiver`]) is
//! owned by the queue's consumer task and is never shared, so no two drains
//! can run concurrently.
//!
//! ## Design Decisions
//!
//! The implementation wraps Tokio MPSC channels rather than a hand-rolled
//! lock-and-notify queue:
//!
//! 1. Per-producer FIFO ordering falls out of the channel contract
//! 2. Bounded channels give backpressure for free (`Block` policy)
//! 3. `try_send` gives the fail-fast overflow path (`Reject` policy)

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tracing::trace;

use crate::message::Message;

/// What a bounded mailbox does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Backpressure: `offer` waits until capacity frees up.
    #[default]
    Block,
    /// Fail fast: `offer` returns [`MailboxError::Full`].
    Reject,
}

#[derive(Clone)]
enum MailboxSender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

/// Producer half of a mailbox. Cheap to clone; safe from any task.
#[derive(Clone)]
pub struct Mailbox {
    sender: MailboxSender,
    policy: OverflowPolicy,
    capacity: Option<usize>,
}

impl Mailbox {
    /// Creates a bounded mailbox and its single consumer half.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (Self, MailboxReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: MailboxSender::Bounded(sender),
                policy,
                capacity: Some(capacity),
            },
            MailboxReceiver {
                receiver: MailboxReceiverInner::Bounded(receiver),
            },
        )
    }

    /// Creates an unbounded mailbox; `offer` never waits and never overflows.
    pub fn unbounded() -> (Self, MailboxReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: MailboxSender::Unbounded(sender),
                policy: OverflowPolicy::Block,
                capacity: None,
            },
            MailboxReceiver {
                receiver: MailboxReceiverInner::Unbounded(receiver),
            },
        )
    }

    /// Enqueues one message for the consumer.
    ///
    /// Full-mailbox behavior follows the configured [`OverflowPolicy`]; a
    /// mailbox whose consumer is gone reports [`MailboxError::Closed`].
    pub async fn offer(&self, message: Message) -> MailboxResult<()> {
        match &self.sender {
            MailboxSender::Unbounded(sender) => {
                sender.send(message).map_err(|_| MailboxError::Closed)
            }
            MailboxSender::Bounded(sender) => match self.policy {
                OverflowPolicy::Block => {
                    sender.send(message).await.map_err(|_| MailboxError::Closed)
                }
                OverflowPolicy::Reject => sender.try_send(message).map_err(|e| match e {
                    TrySendError::Full(_) => MailboxError::Full {
                        capacity: self.capacity.unwrap_or_default(),
                    },
                    TrySendError::Closed(_) => MailboxError::Closed,
                }),
            },
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

enum MailboxReceiverInner {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

/// Consumer half of a mailbox. Held exclusively by the consumer task.
pub struct MailboxReceiver {
    receiver: MailboxReceiverInner,
}

impl MailboxReceiver {
    async fn recv(&mut self) -> Option<Message> {
        match &mut self.receiver {
            MailboxReceiverInner::Bounded(receiver) => receiver.recv().await,
            MailboxReceiverInner::Unbounded(receiver) => receiver.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Message> {
        let result = match &mut self.receiver {
            MailboxReceiverInner::Bounded(receiver) => receiver.try_recv(),
            MailboxReceiverInner::Unbounded(receiver) => receiver.try_recv(),
        };
        match result {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for at least one message, then drains up to `max` without
    /// further waiting. Returns `None` once every producer is gone and the
    /// mailbox is empty.
    pub async fn next_batch(&mut self, max: usize) -> Option<Vec<Message>> {
        let max = max.max(1);
        let first = self.recv().await?;
        let mut batch = Vec::with_capacity(max.min(64));
        batch.push(first);
        while batch.len() < max {
            match self.try_recv() {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        trace!(len = batch.len(), "mailbox batch drained");
        Some(batch)
    }

    /// Closes the mailbox for further sends. Producers blocked in `offer`
    /// get [`MailboxError::Closed`] instead of landing work after the final
    /// drain; already-buffered messages remain drainable.
    pub fn close(&mut self) {
        match &mut self.receiver {
            MailboxReceiverInner::Bounded(receiver) => receiver.close(),
            MailboxReceiverInner::Unbounded(receiver) => receiver.close(),
        }
    }

    /// Drains up to `max` messages without waiting. Used for the final drain
    /// at queue shutdown.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<Message> {
        let mut drained = Vec::new();
        while drained.len() < max {
            match self.try_recv() {
                Some(message) => drained.push(message),
                None => break,
            }
        }
        drained
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailboxError {
    #[error("Mailbox is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Mailbox is closed")]
    Closed,
}

pub type MailboxResult<T> = Result<T, MailboxError>;

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::time::{sleep, Duration};

    use super::*;
    use crate::message::{Message, Value};

    fn message(n: i64) -> Message {
        Message::builder()
            .target_name("test")
            .operation("record")
            .argument(Value::Integer(n))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let (mailbox, mut receiver) = Mailbox::bounded(16, OverflowPolicy::Block);
        for n in 0..5 {
            mailbox.offer(message(n)).await.unwrap();
        }

        let batch = receiver.next_batch(16).await.unwrap();
        let order: Vec<_> = batch.iter().map(|m| m.arguments[0].clone()).collect();
        assert_eq!(
            order,
            (0..5).map(Value::Integer).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_reject_policy_fails_fast_when_full() {
        let (mailbox, _receiver) = Mailbox::bounded(2, OverflowPolicy::Reject);
        mailbox.offer(message(0)).await.unwrap();
        mailbox.offer(message(1)).await.unwrap();

        let result = mailbox.offer(message(2)).await;
        assert_eq!(result, Err(MailboxError::Full { capacity: 2 }));
    }

    #[tokio::test]
    async fn test_block_policy_delivers_under_load() {
        let (mailbox, mut receiver) = Mailbox::bounded(4, OverflowPolicy::Block);
        let received = Arc::new(AtomicUsize::new(0));

        let received_count = received.clone();
        let consumer = tokio::spawn(async move {
            while let Some(batch) = receiver.next_batch(4).await {
                // Slow consumer so producers hit the capacity limit.
                sleep(Duration::from_millis(1)).await;
                received_count.fetch_add(batch.len(), Ordering::SeqCst);
            }
        });

        for n in 0..64 {
            mailbox.offer(message(n)).await.unwrap();
        }
        drop(mailbox);

        consumer.await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 64);
    }

    #[tokio::test]
    async fn test_offer_after_consumer_dropped_is_closed() {
        let (mailbox, receiver) = Mailbox::bounded(4, OverflowPolicy::Block);
        drop(receiver);

        let result = mailbox.offer(message(0)).await;
        assert_eq!(result, Err(MailboxError::Closed));
    }

    #[tokio::test]
    async fn test_next_batch_respects_max() {
        let (mailbox, mut receiver) = Mailbox::unbounded();
        for n in 0..10 {
            mailbox.offer(message(n)).await.unwrap();
        }

        let batch = receiver.next_batch(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        let rest = receiver.drain_up_to(100);
        assert_eq!(rest.len(), 7);
    }

    #[tokio::test]
    async fn test_drain_up_to_never_waits() {
        let (_mailbox, mut receiver) = Mailbox::unbounded();
        assert!(receiver.drain_up_to(10).is_empty());
    }
}
