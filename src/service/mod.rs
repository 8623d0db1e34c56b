//! # Service Layer
//!
//! The actor side of the runtime: a [`mailbox`] holds messages for exactly
//! one consumer, a [`queue`] wraps a service object behind that mailbox with
//! a dedicated consumer task, and a [`proxy`] captures producer-side calls
//! with explicit flush control.
//!
//! ```text
//! ┌──────────┐ call  ┌────────────┐ flush ┌─────────┐ drain ┌─────────┐
//! │ Producer │──────▶│ServiceProxy│──────▶│ Mailbox │──────▶│ Service │
//! └──────────┘       └────────────┘       └─────────┘       └─────────┘
//!                     local buffer         FIFO              one task
//! ```

pub mod mailbox;
pub mod proxy;
pub mod queue;
