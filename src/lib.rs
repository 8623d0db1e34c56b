//! # DENREI: Asynchronous Service-Queue & Event-Dispatch Runtime
//!
//! DENREI turns a method call on a client-side proxy into a message delivered
//! to a single-consumer service object, and fans named events out to
//! heterogeneous subscriber kinds: the queued core of a microservice
//! toolkit, with the wire surfaces (REST, WebSocket, JSON) left to external
//! adapters.
//!
//! ## Core Guarantees
//!
//! - **Actor-style isolation**: the service object moves into its consumer
//!   task at start time; no other task can ever touch it, so services need no
//!   internal locking ([`service::queue`])
//! - **Explicit batching**: producer-side calls buffer locally until a flush
//!   (explicit or size-triggered) transfers them in call order
//!   ([`service::proxy`])
//! - **Queued pub/sub**: the event bus is itself just another queued service;
//!   `register` and `send` are messages and obey the same flush protocol
//!   ([`event::event_manager`])
//! - **Callback-only suspension**: results are routed to callbacks resolved
//!   on the consumer task; nothing blocks a producer awaiting a return value
//!   ([`event::callback_registry`])
//!
//! ## Data Flow
//!
//! ```text
//! caller ─▶ ServiceProxy ─flush─▶ Mailbox ─▶ consumer task ─▶ Service
//!                                                 │
//!                                   side effects: │ send
//!                                                 ▼
//!                            EventManager mailbox ─▶ fan-out ─▶ subscribers
//!                                                                  │
//!                                          CallbackRegistry ◀──────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use denrei::config::EventManagerConfig;
//! use denrei::event_manager::EventManager;
//! use denrei::message::Value;
//! use denrei::subscriber::SubscriberRef;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let events = EventManager::start(&EventManagerConfig::default()).await?;
//!
//! events
//!     .register("rick", SubscriberRef::from_fn(|event| {
//!         println!("received: {:?}", event.payload);
//!     }))
//!     .await?;
//! events.send("rick", Value::from("Hello Rick")).await?;
//!
//! // register/send are queued calls; flush makes them real.
//! events.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod service;
pub mod system;
pub mod timestamp;

// Re-exports
pub use error::*;
pub use event::*;
pub use message::*;
pub use service::*;
