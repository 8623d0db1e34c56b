//! # Subscriber Kinds
//!
//! The event manager accepts several subscriber surfaces (consumer and
//! subscriber traits, channel-bound listeners, bare closures), all of
//! which reduce to one capability: receive an [`Event`] for a channel.
//! [`SubscriberRef`] is the cloneable, queue-transportable form a
//! registration takes while it rides through the manager's own mailbox.

use std::{fmt, sync::Arc};

use super::event_manager::{Event, EventResult};

/// The single capability every subscriber kind reduces to. Invoked
/// sequentially on the event manager's consumer task.
pub trait EventHandler: Send + Sync {
    fn receive(&self, event: &Event) -> EventResult<()>;
}

/// A service-style consumer of events on a channel.
pub trait EventConsumer: Send + Sync {
    fn consume(&self, event: &Event) -> EventResult<()>;
}

/// An observer-style subscriber to events on a channel.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &Event) -> EventResult<()>;
}

/// Cloneable handle to a registered subscriber.
///
/// Equality is identity: two refs are equal only when they point at the same
/// underlying handler, which is what de-duplication at registration time
/// cares about.
#[derive(Clone)]
pub struct SubscriberRef {
    inner: Arc<dyn EventHandler>,
}

impl SubscriberRef {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { inner: handler }
    }

    /// Wraps an [`EventConsumer`].
    pub fn consumer<C>(consumer: C) -> Self
    where
        C: EventConsumer + 'static,
    {
        Self {
            inner: Arc::new(ConsumerAdapter(consumer)),
        }
    }

    /// Wraps an [`EventSubscriber`].
    pub fn subscriber<S>(subscriber: S) -> Self
    where
        S: EventSubscriber + 'static,
    {
        Self {
            inner: Arc::new(SubscriberAdapter(subscriber)),
        }
    }

    /// Wraps a bare closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FnAdapter(f)),
        }
    }

    pub fn receive(&self, event: &Event) -> EventResult<()> {
        self.inner.receive(event)
    }
}

impl fmt::Debug for SubscriberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberRef({:p})", Arc::as_ptr(&self.inner))
    }
}

impl PartialEq for SubscriberRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct ConsumerAdapter<C>(C);

impl<C: EventConsumer> EventHandler for ConsumerAdapter<C> {
    fn receive(&self, event: &Event) -> EventResult<()> {
        self.0.consume(event)
    }
}

struct SubscriberAdapter<S>(S);

impl<S: EventSubscriber> EventHandler for SubscriberAdapter<S> {
    fn receive(&self, event: &Event) -> EventResult<()> {
        self.0.on_event(event)
    }
}

struct FnAdapter<F>(F);

impl<F> EventHandler for FnAdapter<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn receive(&self, event: &Event) -> EventResult<()> {
        (self.0)(event);
        Ok(())
    }
}

/// Lambda adapter for ad-hoc listeners.
pub fn callback_event_listener<F>(f: F) -> SubscriberRef
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    SubscriberRef::from_fn(f)
}

/// A handler bound to its channel at construction time. The explicit
/// replacement for scanning-based listener discovery: the channel name and
/// the typed handler are supplied together, then activated via
/// [`EventManager::listen`](crate::event_manager::EventManager::listen).
pub struct EventListener {
    channel: String,
    handler: SubscriberRef,
}

impl EventListener {
    pub fn new(channel: &str, handler: SubscriberRef) -> Self {
        Self {
            channel: channel.to_string(),
            handler,
        }
    }

    pub fn from_fn<F>(channel: &str, f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self::new(channel, SubscriberRef::from_fn(f))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn into_parts(self) -> (String, SubscriberRef) {
        (self.channel, self.handler)
    }
}
