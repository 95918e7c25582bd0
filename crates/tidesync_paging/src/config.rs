//! Configuration for paging sessions.

use crate::error::{PagingError, PagingResult};
use std::time::Duration;

/// Configuration for a [`crate::PagingDataSource`].
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// Number of items per cache lookup and per reconciliation request.
    pub page_size: usize,
    /// How long a failed session waits for connectivity before retrying
    /// anyway.
    pub retry_timeout: Duration,
}

impl PagingConfig {
    /// Creates a configuration with the given page size.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            retry_timeout: Duration::from_secs(15),
        }
    }

    /// Sets the retry timeout.
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> PagingResult<()> {
        if self.page_size == 0 {
            return Err(PagingError::InvalidConfig(
                "page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PagingConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.retry_timeout, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(
            PagingConfig::new(0).validate(),
            Err(PagingError::InvalidConfig(_))
        ));
    }
}
