use thiserror::Error;

use crate::config::ConfigError;
use crate::event::event_manager::EventError;
use crate::message::{InvocationError, MessageError};
use crate::service::mailbox::MailboxError;
use crate::service::queue::QueueError;
use crate::system::SystemError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("System error: {0}")]
    System(#[from] SystemError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
    // event error
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
