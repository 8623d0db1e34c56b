//! # Message Model
//!
//! A [`Message`] is the unit of work flowing through a service queue: an
//! opaque operation name, ordered [`Value`] arguments, and an optional reply
//! slot that routes the invocation result back through a
//! [`CallbackRegistry`](crate::callback_registry::CallbackRegistry).
//!
//! The transport layer hands the runtime fully-decoded
//! `(target_name, operation, arguments)` tuples; this module is where they
//! become queueable data. Messages are immutable once enqueued; ownership
//! moves into the mailbox and from there into the consumer task.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    event::callback_registry::CallbackRegistry, event::subscriber::SubscriberRef,
    timestamp::Timestamp,
};

/// Opaque token linking a call to its eventual callback resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Argument and payload type carried by messages and events.
///
/// The `Subscriber` variant lets a subscriber registration travel through the
/// queued `register` protocol as an ordinary argument, the same way data
/// payloads do.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Duration(Duration),
    Subscriber(SubscriberRef),
    Null,
}

impl<T: Into<String>> From<T> for Value
where
    T: AsRef<str>,
{
    fn from(value: T) -> Self {
        Value::String(value.into())
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_subscriber(&self) -> Option<&SubscriberRef> {
        match self {
            Value::Subscriber(subscriber) => Some(subscriber),
            _ => None,
        }
    }
}

/// Failure of one queued invocation. Reported to the message's callback when
/// present, logged otherwise; the consumer loop continues either way.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Operation not supported by {target}: {operation}")]
    UnknownOperation { target: String, operation: String },

    #[error("Invalid arguments for {operation}: {message}")]
    BadArguments { operation: String, message: String },

    #[error("Invocation failed: {message}")]
    Failed { message: String },

    #[error("Call unresolved after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },
}

impl InvocationError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        InvocationError::Failed {
            message: message.into(),
        }
    }

    pub fn bad_arguments<S: Into<String>>(operation: &str, message: S) -> Self {
        InvocationError::BadArguments {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of one invocation, as routed to callbacks.
pub type CallResult = Result<Value, InvocationError>;

/// Binds a message to the registry entry holding its callback.
///
/// Resolution happens on the consumer task once the target returns, never
/// inline with the calling task's stack.
#[derive(Clone)]
pub struct ReplySlot {
    correlation_id: CorrelationId,
    registry: Arc<CallbackRegistry>,
}

impl ReplySlot {
    pub fn new(correlation_id: CorrelationId, registry: Arc<CallbackRegistry>) -> Self {
        Self {
            correlation_id,
            registry,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn resolve(self, result: CallResult) {
        self.registry.resolve(&self.correlation_id, result);
    }
}

impl fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplySlot({})", self.correlation_id)
    }
}

/// One unit of work for a service queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub target_name: String,
    pub operation: String,
    pub arguments: Vec<Value>,
    pub correlation_id: CorrelationId,
    pub enqueued_at: Timestamp,
    pub reply: Option<ReplySlot>,
}

impl Message {
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }
}

/// Builder for externally-constructed messages (e.g. from a decoded wire
/// tuple). The proxy layer builds its messages directly.
#[derive(Default)]
pub struct MessageBuilder {
    target_name: Option<String>,
    operation: Option<String>,
    arguments: Vec<Value>,
    reply: Option<ReplySlot>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn target_name(mut self, target_name: &str) -> Self {
        self.target_name = Some(target_name.to_string());
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn argument(mut self, argument: Value) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn reply(mut self, reply: ReplySlot) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn build(self) -> MessageResult<Message> {
        Ok(Message {
            target_name: self.target_name.ok_or(MessageError::BuilderFailed(
                "target_name is required".to_string(),
            ))?,
            operation: self.operation.ok_or(MessageError::BuilderFailed(
                "operation is required".to_string(),
            ))?,
            arguments: self.arguments,
            correlation_id: CorrelationId::new(),
            enqueued_at: Timestamp::now(),
            reply: self.reply,
        })
    }
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message builder failed: {0}")]
    BuilderFailed(String),
}

pub type MessageResult<T> = Result<T, MessageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_target() {
        let result = Message::builder().operation("ping").build();
        assert!(matches!(result, Err(MessageError::BuilderFailed(_))));
    }

    #[test]
    fn test_builder_requires_operation() {
        let result = Message::builder().target_name("svc").build();
        assert!(matches!(result, Err(MessageError::BuilderFailed(_))));
    }

    #[test]
    fn test_builder_preserves_argument_order() {
        let message = Message::builder()
            .target_name("svc")
            .operation("record")
            .argument(Value::Integer(1))
            .argument(Value::Integer(2))
            .argument(Value::Integer(3))
            .build()
            .unwrap();
        assert_eq!(
            message.arguments,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        assert!(message.reply.is_none());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn test_value_from_str() {
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::Integer(1).as_str(), None);
    }
}
