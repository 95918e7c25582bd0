//! Configuration for the operation engine.

use std::time::Duration;

/// Configuration for an [`crate::OperationEngine`].
#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// Client the engine works for. Rows of other clients are ignored.
    pub client_type: String,
    /// How long `execute` waits for an actor to pick an operation up.
    pub pickup_timeout: Duration,
    /// Hard limit on a single `perform` call.
    pub execution_timeout: Duration,
    /// Pause between a change notification and the dispatch query, so
    /// bursts of enqueues are picked up together.
    pub notification_throttle: Duration,
    /// Extra time `execute` waits past the execution timeout for the
    /// dispatcher to record its result.
    pub execute_margin: Duration,
}

impl OperationConfig {
    /// Creates a configuration for one client.
    pub fn new(client_type: impl Into<String>) -> Self {
        Self {
            client_type: client_type.into(),
            pickup_timeout: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(60),
            notification_throttle: Duration::ZERO,
            execute_margin: Duration::from_secs(1),
        }
    }

    /// Sets the pickup timeout.
    pub fn with_pickup_timeout(mut self, timeout: Duration) -> Self {
        self.pickup_timeout = timeout;
        self
    }

    /// Sets the execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Sets the notification throttle.
    pub fn with_notification_throttle(mut self, throttle: Duration) -> Self {
        self.notification_throttle = throttle;
        self
    }

    /// Sets the execute margin.
    pub fn with_execute_margin(mut self, margin: Duration) -> Self {
        self.execute_margin = margin;
        self
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OperationConfig::default();
        assert_eq!(config.pickup_timeout, Duration::from_secs(10));
        assert_eq!(config.execution_timeout, Duration::from_secs(60));
        assert!(config.notification_throttle.is_zero());
    }

    #[test]
    fn builder() {
        let config = OperationConfig::new("mail")
            .with_pickup_timeout(Duration::from_secs(1))
            .with_notification_throttle(Duration::from_millis(50));
        assert_eq!(config.client_type, "mail");
        assert_eq!(config.pickup_timeout, Duration::from_secs(1));
        assert_eq!(config.notification_throttle, Duration::from_millis(50));
    }
}
