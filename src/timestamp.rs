use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Creation-time marker carried by messages, events and pending callbacks.
///
/// Wraps [`SystemTime`] so that staleness checks (see
/// [`crate::callback_registry::CallbackRegistry::sweep_older_than`]) can be
/// expressed as a simple [`Timestamp::age`] comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Timestamp(SystemTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }

    /// Time elapsed since this marker was taken. Clock steps backwards are
    /// reported as zero age.
    pub fn age(&self) -> Duration {
        self.0.elapsed().unwrap_or(Duration::ZERO)
    }

    pub fn into_inner(self) -> SystemTime {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self(time)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.age().as_millis())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[test]
    fn test_timestamp_now_is_fresh() {
        let timestamp = Timestamp::now();
        assert!(timestamp.age() < Duration::from_secs(1));
    }

    #[test]
    fn test_timestamp_default_is_now() {
        let timestamp = Timestamp::default();
        assert!(timestamp.age() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_timestamp_age_grows() {
        let timestamp = Timestamp::now();
        sleep(Duration::from_millis(20)).await;
        assert!(timestamp.age() >= Duration::from_millis(10));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let system_time = SystemTime::now();
        let timestamp = Timestamp::from(system_time);
        assert_eq!(timestamp.into_inner(), system_time);
    }

    #[test]
    fn test_timestamp_serialize_round_trip() {
        let timestamp = Timestamp::now();
        let serialized = serde_json::to_string(&timestamp).unwrap();
        let deserialized: Timestamp = serde_json::from_str(&serialized).unwrap();
        assert_eq!(timestamp, deserialized);
    }
}
