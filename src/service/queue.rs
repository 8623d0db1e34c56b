//! # Service Queue
//!
//! A service queue wraps one service object behind a [`Mailbox`] and a single
//! consumer task. `start()` moves the owned service value into the spawned
//! loop, so for its entire lifetime the object is touched by exactly one
//! task, so service implementations need no internal locking. Producers reach
//! the queue only through cloneable [`QueueHandle`]s and
//! [`ServiceProxy`](crate::proxy::ServiceProxy)s.
//!
//! ## Lifecycle
//!
//! ```text
//! CREATED ──start()──▶ RUNNING ──stop()──▶ STOPPING ──▶ STOPPED
//! ```
//!
//! `stop()` signals the consumer loop, which performs a final drain of every
//! message already offered before exiting (drain-then-stop). Offers against a
//! stopping or stopped queue are rejected with [`QueueError::Closed`], never
//! silently dropped.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::{
    config::ServiceConfig,
    event::callback_registry::CallbackRegistry,
    message::{CallResult, Message, Value},
    service::mailbox::{Mailbox, MailboxError, MailboxReceiver, OverflowPolicy},
    service::proxy::ServiceProxy,
};

/// Lifecycle states of a service queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// A queued service object.
///
/// `handle` receives opaque operation names with ordered arguments, the
/// generic `invoke(name, args)` entry point a binder or proxy feeds. The
/// `init`/`shutdown` hooks run on the consumer task before the first and
/// after the last message.
#[async_trait]
pub trait Service: Send + 'static {
    async fn handle(&mut self, operation: &str, arguments: Vec<Value>) -> CallResult;

    async fn init(&mut self) {}

    async fn shutdown(&mut self) {}
}

/// Configures and builds a [`ServiceQueue`].
pub struct ServiceQueueBuilder {
    name: String,
    config: ServiceConfig,
}

impl ServiceQueueBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: ServiceConfig::default(),
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.config.mailbox_capacity = Some(capacity);
        self
    }

    /// Removes the mailbox bound; offers never wait and never overflow.
    pub fn unbounded(mut self) -> Self {
        self.config.mailbox_capacity = None;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn build<S: Service>(self, service: S) -> ServiceQueue<S> {
        ServiceQueue::new(&self.name, service, &self.config)
    }
}

/// Single-consumer actor wrapping one service object.
pub struct ServiceQueue<S: Service> {
    name: String,
    mailbox: Mailbox,
    service: Mutex<Option<S>>,
    receiver: Mutex<Option<MailboxReceiver>>,
    state: Arc<RwLock<ServiceState>>,
    shutdown_tx: broadcast::Sender<()>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    batch_size: usize,
    proxy_batch_size: usize,
}

impl<S: Service> ServiceQueue<S> {
    pub fn new(name: &str, service: S, config: &ServiceConfig) -> Self {
        let (mailbox, receiver) = match config.mailbox_capacity {
            Some(capacity) => Mailbox::bounded(capacity, config.overflow_policy),
            None => Mailbox::unbounded(),
        };
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            name: name.to_string(),
            mailbox,
            service: Mutex::new(Some(service)),
            receiver: Mutex::new(Some(receiver)),
            state: Arc::new(RwLock::new(ServiceState::Created)),
            shutdown_tx,
            task_handle: Mutex::new(None),
            batch_size: config.batch_size.max(1),
            proxy_batch_size: config.proxy_batch_size.max(1),
        }
    }

    pub fn builder(name: &str) -> ServiceQueueBuilder {
        ServiceQueueBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Moves the service object into a freshly spawned consumer loop.
    #[tracing::instrument(skip(self), fields(queue = %self.name), level = "debug")]
    pub async fn start(&self) -> QueueResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ServiceState::Created {
                return Err(QueueError::AlreadyStarted {
                    name: self.name.clone(),
                    state: *state,
                });
            }
            *state = ServiceState::Running;
        }

        let service = self
            .service
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::AlreadyStarted {
                name: self.name.clone(),
                state: ServiceState::Running,
            })?;
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::AlreadyStarted {
                name: self.name.clone(),
                state: ServiceState::Running,
            })?;

        let handle = tokio::spawn(consumer_loop(
            self.name.clone(),
            service,
            receiver,
            self.state.clone(),
            self.shutdown_tx.subscribe(),
            self.batch_size,
        ));
        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Signals shutdown and waits for the consumer loop to finish its final
    /// drain. Stopping an already stopped queue is a no-op.
    #[tracing::instrument(skip(self), fields(queue = %self.name), level = "debug")]
    pub async fn stop(&self) -> QueueResult<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ServiceState::Created => {
                    *state = ServiceState::Stopped;
                    return Ok(());
                }
                ServiceState::Stopping | ServiceState::Stopped => return Ok(()),
                ServiceState::Running => *state = ServiceState::Stopping,
            }
        }

        // The consumer may already have exited on its own.
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.await.map_err(|e| QueueError::JoinFailed {
                name: self.name.clone(),
                message: e.to_string(),
            })?;
        }
        *self.state.write().await = ServiceState::Stopped;
        Ok(())
    }

    /// Producer-side handle; cheap to clone, valid from any task.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            name: self.name.clone(),
            mailbox: self.mailbox.clone(),
            state: self.state.clone(),
        }
    }

    /// A proxy with its own callback registry and flush buffer, auto-flushing
    /// at the configured threshold.
    pub fn create_proxy(&self) -> ServiceProxy {
        self.create_proxy_with_batch(self.proxy_batch_size)
    }

    /// Same as [`ServiceQueue::create_proxy`] with an explicit auto-flush
    /// threshold.
    pub fn create_proxy_with_batch(&self, batch_size: usize) -> ServiceProxy {
        ServiceProxy::new(
            self.handle(),
            Arc::new(CallbackRegistry::new()),
            batch_size,
        )
    }
}

async fn consumer_loop<S: Service>(
    name: String,
    mut service: S,
    mut receiver: MailboxReceiver,
    state: Arc<RwLock<ServiceState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    batch_size: usize,
) {
    debug!(queue = %name, "consumer loop started");
    service.init().await;

    loop {
        tokio::select! {
            batch = receiver.next_batch(batch_size) => match batch {
                Some(batch) => {
                    for message in batch {
                        invoke(&name, &mut service, message).await;
                    }
                }
                // Every producer handle is gone.
                None => break,
            },
            _ = shutdown_rx.recv() => {
                // Late offers fail with Closed instead of landing unseen.
                receiver.close();
                loop {
                    let remaining = receiver.drain_up_to(batch_size);
                    if remaining.is_empty() {
                        break;
                    }
                    for message in remaining {
                        invoke(&name, &mut service, message).await;
                    }
                }
                break;
            }
        }
    }

    service.shutdown().await;
    *state.write().await = ServiceState::Stopped;
    debug!(queue = %name, "consumer loop stopped");
}

/// Invokes one message against the service. A handler error is routed to the
/// message's callback when present, logged otherwise; it never ends the loop.
async fn invoke<S: Service>(name: &str, service: &mut S, message: Message) {
    let Message {
        operation,
        arguments,
        correlation_id,
        reply,
        ..
    } = message;
    trace!(queue = %name, %operation, %correlation_id, "invoking");

    let result = service.handle(&operation, arguments).await;
    match (reply, result) {
        (Some(reply), result) => reply.resolve(result),
        (None, Err(e)) => warn!(queue = %name, %operation, "invocation failed: {}", e),
        (None, Ok(_)) => {}
    }
}

/// Cloneable producer-side reference to a running queue.
#[derive(Clone)]
pub struct QueueHandle {
    name: String,
    mailbox: Mailbox,
    state: Arc<RwLock<ServiceState>>,
}

impl QueueHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Enqueues one message. Rejected once the queue has begun stopping.
    pub async fn offer(&self, message: Message) -> QueueResult<()> {
        let state = *self.state.read().await;
        if !matches!(state, ServiceState::Created | ServiceState::Running) {
            return Err(QueueError::Closed {
                name: self.name.clone(),
            });
        }
        self.mailbox.offer(message).await.map_err(|e| match e {
            MailboxError::Full { capacity } => QueueError::MailboxFull {
                name: self.name.clone(),
                capacity,
            },
            MailboxError::Closed => QueueError::Closed {
                name: self.name.clone(),
            },
        })
    }
}

/// Type-erased view of a queue for orchestration: registries hold many
/// queues wrapping different service types.
#[async_trait]
pub trait QueueControl: Send + Sync {
    fn name(&self) -> &str;
    async fn state(&self) -> ServiceState;
    async fn stop(&self) -> QueueResult<()>;
}

#[async_trait]
impl<S: Service> QueueControl for ServiceQueue<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn state(&self) -> ServiceState {
        ServiceQueue::state(self).await
    }

    async fn stop(&self) -> QueueResult<()> {
        ServiceQueue::stop(self).await
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Service queue closed: {name}")]
    Closed { name: String },

    #[error("Service queue mailbox full: {name} (capacity {capacity})")]
    MailboxFull { name: String, capacity: usize },

    #[error("Service queue already started: {name} (state: {state})")]
    AlreadyStarted { name: String, state: ServiceState },

    #[error("Service queue consumer join failed: {name}: {message}")]
    JoinFailed { name: String, message: String },
}

pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::time::{sleep, Duration};

    use super::*;
    use crate::message::InvocationError;

    struct Counter {
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Counter {
        async fn handle(&mut self, operation: &str, _arguments: Vec<Value>) -> CallResult {
            match operation {
                "tick" => {
                    let n = self.handled.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(Value::Integer(n as i64))
                }
                _ => Err(InvocationError::UnknownOperation {
                    target: "counter".to_string(),
                    operation: operation.to_string(),
                }),
            }
        }
    }

    fn tick_message(target: &str) -> Message {
        Message::builder()
            .target_name(target)
            .operation("tick")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: Arc::new(AtomicUsize::new(0)),
        });
        assert_eq!(queue.state().await, ServiceState::Created);

        queue.start().await.unwrap();
        assert_eq!(queue.state().await, ServiceState::Running);

        queue.stop().await.unwrap();
        assert_eq!(queue.state().await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: Arc::new(AtomicUsize::new(0)),
        });
        queue.start().await.unwrap();

        let result = queue.start().await;
        assert!(matches!(result, Err(QueueError::AlreadyStarted { .. })));

        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: Arc::new(AtomicUsize::new(0)),
        });
        queue.start().await.unwrap();
        queue.stop().await.unwrap();
        queue.stop().await.unwrap();
        assert_eq!(queue.state().await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_offered_messages_reach_the_service() {
        let handled = Arc::new(AtomicUsize::new(0));
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: handled.clone(),
        });
        queue.start().await.unwrap();

        let handle = queue.handle();
        for _ in 0..10 {
            handle.offer(tick_message("counter")).await.unwrap();
        }

        sleep(Duration::from_millis(50)).await;
        assert_eq!(handled.load(Ordering::SeqCst), 10);

        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_after_stop_is_closed() {
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: Arc::new(AtomicUsize::new(0)),
        });
        queue.start().await.unwrap();
        queue.stop().await.unwrap();

        let result = queue.handle().offer(tick_message("counter")).await;
        assert!(matches!(result, Err(QueueError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_stop_drains_pending_work() {
        let handled = Arc::new(AtomicUsize::new(0));
        let queue = ServiceQueue::<Counter>::builder("counter").build(Counter {
            handled: handled.clone(),
        });
        queue.start().await.unwrap();

        let handle = queue.handle();
        for _ in 0..100 {
            handle.offer(tick_message("counter")).await.unwrap();
        }
        queue.stop().await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 100);
    }
}
