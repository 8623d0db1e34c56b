//! # Event Manager
//!
//! Name-addressed publish/subscribe bus, itself hosted on a service queue:
//! `register` and `send` are captured as ordinary queued messages, so they
//! need the manager's `flush` before they are guaranteed active. The channel
//! table lives inside the queued service object and is therefore only ever
//! touched by the manager's single consumer task. No locking needed.
//!
//! ## Event Flow
//!
//! ```text
//! ┌─────────┐ send  ┌─────────────┐ drain ┌─────────────┐
//! │Publisher│──────▶│own Mailbox  │──────▶│ChannelTable │
//! └─────────┘ flush └─────────────┘       └──────┬──────┘
//!                                                │ fan-out, registration order
//!                                   ┌────────────┼────────────┐
//!                                   ▼            ▼            ▼
//!                              subscriber   subscriber   subscriber
//! ```
//!
//! Delivery fan-out is per currently-registered subscriber at drain time:
//! a subscriber registered after a `send` was enqueued but before it was
//! drained may or may not observe that event. Channel names are exact-match
//! only; sending to a channel nobody registered on is a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    config::EventManagerConfig,
    message::{CallResult, InvocationError, Value},
    service::proxy::ServiceProxy,
    service::queue::{QueueError, Service, ServiceQueue, ServiceState},
    timestamp::Timestamp,
};

use super::subscriber::{EventListener, SubscriberRef};

/// Queue identity of the system event manager.
pub const EVENT_MANAGER_NAME: &str = "event-manager";

const OP_REGISTER: &str = "register";
const OP_SEND: &str = "send";

/// A discrete occurrence published on a channel. Subscribers receive it by
/// shared reference on the manager's consumer task; anything they keep, they
/// clone, so one subscriber can never mutate what the next one sees.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub channel: String,
    pub payload: Value,
    pub produced_at: Timestamp,
}

impl Event {
    pub fn new(channel: &str, payload: Value) -> Self {
        Self {
            channel: channel.to_string(),
            payload,
            produced_at: Timestamp::now(),
        }
    }
}

/// Channel-name-keyed subscriber lists. Lives behind the manager's queue, so
/// a plain `HashMap` suffices.
#[derive(Default)]
struct ChannelTable {
    channels: HashMap<String, Vec<SubscriberRef>>,
}

impl ChannelTable {
    fn register(&mut self, channel: String, subscriber: SubscriberRef) -> usize {
        let subscribers = self.channels.entry(channel).or_default();
        subscribers.push(subscriber);
        subscribers.len()
    }

    fn fan_out(&self, channel: &str, payload: Value) -> usize {
        let Some(subscribers) = self.channels.get(channel) else {
            trace!(channel, "send on channel with no subscribers");
            return 0;
        };

        let event = Event::new(channel, payload);
        let mut delivered = 0;
        for subscriber in subscribers {
            // One failing subscriber must not starve the rest.
            match subscriber.receive(&event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(channel, "subscriber failed: {}", e),
            }
        }
        delivered
    }
}

#[async_trait]
impl Service for ChannelTable {
    async fn handle(&mut self, operation: &str, arguments: Vec<Value>) -> CallResult {
        match operation {
            OP_REGISTER => {
                let mut args = arguments.into_iter();
                let channel = match args.next() {
                    Some(Value::String(channel)) => channel,
                    other => {
                        return Err(InvocationError::bad_arguments(
                            OP_REGISTER,
                            format!("channel name expected, got {:?}", other),
                        ))
                    }
                };
                let subscriber = match args.next() {
                    Some(Value::Subscriber(subscriber)) => subscriber,
                    other => {
                        return Err(InvocationError::bad_arguments(
                            OP_REGISTER,
                            format!("subscriber expected, got {:?}", other),
                        ))
                    }
                };
                let total = self.register(channel, subscriber);
                Ok(Value::Integer(total as i64))
            }
            OP_SEND => {
                let mut args = arguments.into_iter();
                let channel = match args.next() {
                    Some(Value::String(channel)) => channel,
                    other => {
                        return Err(InvocationError::bad_arguments(
                            OP_SEND,
                            format!("channel name expected, got {:?}", other),
                        ))
                    }
                };
                let payload = args.next().unwrap_or(Value::Null);
                let delivered = self.fan_out(&channel, payload);
                Ok(Value::Integer(delivered as i64))
            }
            _ => Err(InvocationError::UnknownOperation {
                target: EVENT_MANAGER_NAME.to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

/// Client handle to the event bus.
///
/// Both `register` and `send` are buffered proxy calls; call
/// [`EventManager::flush`] before asserting on delivery.
pub struct EventManager {
    queue: Arc<ServiceQueue<ChannelTable>>,
    proxy: ServiceProxy,
}

impl EventManager {
    /// Builds and starts the manager's own service queue.
    #[tracing::instrument(skip(config), level = "debug")]
    pub async fn start(config: &EventManagerConfig) -> EventResult<Self> {
        let queue = ServiceQueue::<ChannelTable>::builder(EVENT_MANAGER_NAME)
            .mailbox_capacity(config.mailbox_capacity)
            .overflow_policy(config.overflow_policy)
            .batch_size(config.batch_size)
            .build(ChannelTable::default());
        queue.start().await?;

        let proxy = queue.create_proxy_with_batch(config.proxy_batch_size);
        Ok(Self {
            queue: Arc::new(queue),
            proxy,
        })
    }

    /// Appends a subscriber to the channel's ordered list, creating the
    /// channel if absent. Active after the next flush.
    #[tracing::instrument(skip(self, subscriber), level = "debug")]
    pub async fn register(&self, channel: &str, subscriber: SubscriberRef) -> EventResult<()> {
        self.proxy
            .call(
                OP_REGISTER,
                vec![Value::from(channel), Value::Subscriber(subscriber)],
            )
            .await?;
        Ok(())
    }

    /// Registers a channel-bound listener (see [`EventListener`]).
    pub async fn listen(&self, listener: EventListener) -> EventResult<()> {
        let (channel, handler) = listener.into_parts();
        self.register(&channel, handler).await
    }

    /// Publishes `payload` on `channel`. Delivered to every subscriber
    /// registered at drain time, after the next flush.
    pub async fn send(&self, channel: &str, payload: Value) -> EventResult<()> {
        self.proxy
            .call(OP_SEND, vec![Value::from(channel), payload])
            .await?;
        Ok(())
    }

    /// Guarantees every buffered `register`/`send` is enqueued on the
    /// manager's mailbox.
    pub async fn flush(&self) -> EventResult<()> {
        self.proxy.flush().await?;
        Ok(())
    }

    /// Buffered calls not yet handed to the manager's mailbox.
    pub fn pending(&self) -> usize {
        self.proxy.pending()
    }

    pub async fn state(&self) -> ServiceState {
        self.queue.state().await
    }

    /// Resolves callback entries older than `max_age` with a timeout error.
    /// The core runs no timer; a collaborator calls this on its own schedule.
    pub fn sweep_stale_callbacks(&self, max_age: Duration) -> usize {
        self.proxy.registry().sweep_older_than(max_age)
    }

    /// Flushes outstanding calls, then stops the manager's queue after its
    /// final drain.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn stop(&self) -> EventResult<()> {
        if let Err(e) = self.proxy.flush().await {
            debug!("flush during stop skipped: {}", e);
        }
        self.queue.stop().await?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Subscriber failed: {message}")]
    SubscriberFailed { message: String },
}

impl EventError {
    pub fn subscriber<S: Into<String>>(message: S) -> Self {
        EventError::SubscriberFailed {
            message: message.into(),
        }
    }
}

pub type EventResult<T> = Result<T, EventError>;
