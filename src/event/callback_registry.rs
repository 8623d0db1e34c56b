//! # Callback Registry
//!
//! Maps an outstanding call's [`CorrelationId`] to its pending callback and
//! resolves it when the consumer task finishes the invocation. Resolution is
//! idempotent: duplicate or unknown ids are a no-op, so late responses never
//! fault. No timer runs here; [`CallbackRegistry::sweep_older_than`] is the
//! hook a collaborator calls to expire stale entries on its own schedule.

use std::time::Duration;

use dashmap::DashMap;
use tracing::trace;

use crate::{
    message::{CallResult, CorrelationId, InvocationError},
    timestamp::Timestamp,
};

type Callback = Box<dyn FnOnce(CallResult) + Send + Sync + 'static>;

struct CallbackEntry {
    callback: Callback,
    created_at: Timestamp,
}

/// Concurrent registry of pending callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<CorrelationId, CallbackEntry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a callback under the given id. Happens at call time, before
    /// the message is buffered.
    pub fn register<F>(&self, correlation_id: CorrelationId, callback: F)
    where
        F: FnOnce(CallResult) + Send + Sync + 'static,
    {
        self.entries.insert(
            correlation_id,
            CallbackEntry {
                callback: Box::new(callback),
                created_at: Timestamp::now(),
            },
        );
    }

    /// Removes the entry and invokes its callback with `result`.
    ///
    /// Returns `false` when the id is unknown or already resolved: a no-op,
    /// never an error.
    pub fn resolve(&self, correlation_id: &CorrelationId, result: CallResult) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => {
                (entry.callback)(result);
                true
            }
            None => {
                trace!(%correlation_id, "resolve on unknown or resolved id ignored");
                false
            }
        }
    }

    /// Drops an entry without invoking its callback.
    pub fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.entries.remove(correlation_id).is_some()
    }

    /// Teardown: drops every pending entry unresolved. Returns how many were
    /// discarded.
    pub fn discard_all(&self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }

    /// Sweep hook: resolves every entry older than `max_age` with
    /// [`InvocationError::TimedOut`]. Returns the number swept.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let stale: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().created_at.age() > max_age)
            .map(|entry| *entry.key())
            .collect();

        let mut swept = 0;
        for correlation_id in stale {
            if let Some((_, entry)) = self.entries.remove(&correlation_id) {
                let elapsed_ms = entry.created_at.age().as_millis() as u64;
                (entry.callback)(Err(InvocationError::TimedOut { elapsed_ms }));
                swept += 1;
            }
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use tokio::time::sleep;

    use super::*;
    use crate::message::Value;

    #[test]
    fn test_resolve_invokes_callback_once() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let correlation_id = CorrelationId::new();

        let count = calls.clone();
        registry.register(correlation_id, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.resolve(&correlation_id, Ok(Value::Null)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_resolve_is_noop() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let correlation_id = CorrelationId::new();

        let count = calls.clone();
        registry.register(correlation_id, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.resolve(&correlation_id, Ok(Value::Null)));
        assert!(!registry.resolve(&correlation_id, Ok(Value::Null)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_id_resolve_is_noop() {
        let registry = CallbackRegistry::new();
        assert!(!registry.resolve(&CorrelationId::new(), Ok(Value::Null)));
    }

    #[test]
    fn test_discard_all_skips_callbacks() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = calls.clone();
            registry.register(CorrelationId::new(), move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.discard_all(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_resolves_only_stale_entries() {
        let registry = CallbackRegistry::new();
        let results = Arc::new(Mutex::new(Vec::new()));

        let stale_results = results.clone();
        let stale_id = CorrelationId::new();
        registry.register(stale_id, move |result| {
            stale_results.lock().unwrap().push(result);
        });

        sleep(Duration::from_millis(50)).await;

        let fresh_results = results.clone();
        registry.register(CorrelationId::new(), move |result| {
            fresh_results.lock().unwrap().push(result);
        });

        let swept = registry.sweep_older_than(Duration::from_millis(20));
        assert_eq!(swept, 1);
        assert_eq!(registry.len(), 1);

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(InvocationError::TimedOut { .. })
        ));
    }
}
