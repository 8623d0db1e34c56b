//! # Event Dispatch
//!
//! Named publish/subscribe on top of the service layer. The
//! [`event_manager`] hosts the channel table on its own service queue, the
//! [`subscriber`] module supplies the subscriber kinds it fans out to, and
//! the [`callback_registry`] resolves call results back to their origin.
//!
//! ## Delivery Model
//!
//! 1. `register`/`send` are captured as queued messages (flush applies)
//! 2. The manager's consumer drains them in FIFO order
//! 3. Each event reaches every currently-registered subscriber of its
//!    channel, in registration order

pub mod callback_registry;
pub mod event_manager;
pub mod subscriber;
