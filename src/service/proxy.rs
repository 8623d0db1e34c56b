//! # Service Proxy
//!
//! The producer-side interception layer: a method call becomes a [`Message`]
//! in the proxy's local buffer, and only [`ServiceProxy::flush`] transfers
//! the buffer to the target queue's mailbox. The two-stage buffering batches
//! many rapid calls into fewer cross-task handoffs; an internal size
//! threshold flushes automatically so unbatched callers still make progress.
//!
//! No call returns a value synchronously; "waiting for a result" is always
//! done by observing shared state set from within the callback, which runs on
//! the target's consumer task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{
    event::callback_registry::CallbackRegistry,
    message::{CallResult, CorrelationId, Message, ReplySlot, Value},
    service::queue::{QueueError, QueueHandle, QueueResult, ServiceState},
    timestamp::Timestamp,
};

/// Call-capturing client proxy bound to one service queue. Many proxies may
/// target the same queue; each keeps its own buffer and callback registry.
pub struct ServiceProxy {
    queue: QueueHandle,
    registry: Arc<CallbackRegistry>,
    buffer: Mutex<Vec<Message>>,
    batch_size: usize,
}

impl ServiceProxy {
    pub fn new(queue: QueueHandle, registry: Arc<CallbackRegistry>, batch_size: usize) -> Self {
        Self {
            queue,
            registry,
            buffer: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    pub fn target_name(&self) -> &str {
        self.queue.name()
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Buffered calls not yet transferred to the mailbox.
    pub fn pending(&self) -> usize {
        self.buffer().len()
    }

    /// Captures a fire-and-forget call. Buffered until the next flush.
    pub async fn call(&self, operation: &str, arguments: Vec<Value>) -> QueueResult<CorrelationId> {
        self.push_message(operation, arguments, CorrelationId::new(), None)
            .await
    }

    /// Captures a call whose result is routed to `callback`, invoked from the
    /// target's consumer task once the operation completes.
    pub async fn call_with_callback<F>(
        &self,
        operation: &str,
        arguments: Vec<Value>,
        callback: F,
    ) -> QueueResult<CorrelationId>
    where
        F: FnOnce(CallResult) + Send + Sync + 'static,
    {
        let correlation_id = CorrelationId::new();
        self.registry.register(correlation_id, callback);
        let reply = ReplySlot::new(correlation_id, self.registry.clone());
        self.push_message(operation, arguments, correlation_id, Some(reply))
            .await
    }

    /// Atomically transfers the entire local buffer to the mailbox in call
    /// order. After this returns `Ok`, every prior call is enqueued (not
    /// necessarily processed).
    #[tracing::instrument(skip(self), fields(target = %self.queue.name()), level = "debug")]
    pub async fn flush(&self) -> QueueResult<()> {
        let pending = std::mem::take(&mut *self.buffer());
        if pending.is_empty() {
            return Ok(());
        }
        trace!(len = pending.len(), "flushing buffered calls");

        let mut messages = pending.into_iter();
        while let Some(message) = messages.next() {
            let correlation_id = message.correlation_id;
            let had_reply = message.reply.is_some();
            if let Err(e) = self.queue.offer(message).await {
                // The producer learns of the rejection through the error;
                // callbacks of unsent calls are discarded, not leaked.
                if had_reply {
                    self.registry.discard(&correlation_id);
                }
                for rejected in messages {
                    if rejected.reply.is_some() {
                        self.registry.discard(&rejected.correlation_id);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn push_message(
        &self,
        operation: &str,
        arguments: Vec<Value>,
        correlation_id: CorrelationId,
        reply: Option<ReplySlot>,
    ) -> QueueResult<CorrelationId> {
        // Reject up front instead of buffering into a queue that will never
        // drain again.
        let state = self.queue.state().await;
        if !matches!(state, ServiceState::Created | ServiceState::Running) {
            if reply.is_some() {
                self.registry.discard(&correlation_id);
            }
            return Err(QueueError::Closed {
                name: self.queue.name().to_string(),
            });
        }

        let message = Message {
            target_name: self.queue.name().to_string(),
            operation: operation.to_string(),
            arguments,
            correlation_id,
            enqueued_at: Timestamp::now(),
            reply,
        };

        let should_flush = {
            let mut buffer = self.buffer();
            buffer.push(message);
            buffer.len() >= self.batch_size
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(correlation_id)
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<Message>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
