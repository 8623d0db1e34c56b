//! # System
//!
//! Top-level orchestration: owns the system event manager, a registry of
//! started service queues, and the shutdown sequence. Queues register here by
//! name so one `shutdown()` can stop everything in parallel under a timeout,
//! with the event bus going last so stopping services can still publish.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tokio::{sync::broadcast, time::timeout};
use tracing::{info, warn};

use crate::{
    config::SystemConfig,
    event::event_manager::{EventError, EventManager},
    service::queue::{QueueControl, QueueError},
};

pub struct System {
    config: SystemConfig,
    event_manager: Arc<EventManager>,
    queues: DashMap<String, Arc<dyn QueueControl>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl System {
    /// Boots the system event manager.
    #[tracing::instrument(skip(config), level = "debug")]
    pub async fn start(config: SystemConfig) -> SystemResult<Self> {
        let event_manager = Arc::new(EventManager::start(&config.event).await?);
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            event_manager,
            queues: DashMap::new(),
            shutdown_tx,
        })
    }

    pub fn event_manager(&self) -> Arc<EventManager> {
        self.event_manager.clone()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Receiver that fires once `shutdown()` begins.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tracks a started queue for system-wide shutdown. Names are unique.
    pub fn register_queue(&self, queue: Arc<dyn QueueControl>) -> SystemResult<()> {
        let name = queue.name().to_string();
        if self.queues.contains_key(&name) {
            return Err(SystemError::QueueAlreadyRegistered { name });
        }
        self.queues.insert(name, queue);
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Option<Arc<dyn QueueControl>> {
        self.queues.get(name).map(|entry| entry.value().clone())
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sweep hook: expires event-manager callbacks older than the configured
    /// callback timeout.
    pub fn sweep_stale_callbacks(&self) -> usize {
        self.event_manager
            .sweep_stale_callbacks(self.config.callback_timeout)
    }

    /// Stops every registered queue in parallel, each under the configured
    /// timeout, then stops the event manager.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn shutdown(&self) -> SystemResult<()> {
        info!("system shutdown initiated");
        let _ = self.shutdown_tx.send(());

        let deadline = self.config.shutdown_timeout;
        let stops: Vec<_> = self
            .queues
            .iter()
            .map(|entry| {
                let queue = entry.value().clone();
                async move {
                    match timeout(deadline, queue.stop()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(queue = %queue.name(), "stop failed: {}", e),
                        Err(_) => warn!(
                            queue = %queue.name(),
                            timeout_ms = deadline.as_millis() as u64,
                            "stop timed out"
                        ),
                    }
                }
            })
            .collect();
        join_all(stops).await;
        self.queues.clear();

        self.event_manager.stop().await?;
        info!("system shutdown completed");
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Service queue already registered: {name}")]
    QueueAlreadyRegistered { name: String },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

pub type SystemResult<T> = Result<T, SystemError>;

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        message::{CallResult, Value},
        service::queue::{Service, ServiceQueue, ServiceState},
    };

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        async fn handle(&mut self, _operation: &str, arguments: Vec<Value>) -> CallResult {
            Ok(arguments.into_iter().next().unwrap_or(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_duplicate_queue_name_is_rejected() {
        let system = System::start(SystemConfig::default()).await.unwrap();

        let first = Arc::new(ServiceQueue::<Echo>::builder("echo").build(Echo));
        let second = Arc::new(ServiceQueue::<Echo>::builder("echo").build(Echo));

        system.register_queue(first).unwrap();
        let result = system.register_queue(second);
        assert!(matches!(
            result,
            Err(SystemError::QueueAlreadyRegistered { .. })
        ));

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_registered_queues() {
        let system = System::start(SystemConfig::default()).await.unwrap();

        let queue = Arc::new(ServiceQueue::<Echo>::builder("echo").build(Echo));
        queue.start().await.unwrap();
        system.register_queue(queue.clone()).unwrap();

        system.shutdown().await.unwrap();

        assert_eq!(queue.state().await, ServiceState::Stopped);
        assert_eq!(system.event_manager().state().await, ServiceState::Stopped);
        assert!(system.queue_names().is_empty());
    }
}
