//! Fetch configuration.

use std::time::Duration;

use crate::error::FetchError;

/// Configuration shared by the fetch strategies.
///
/// `queues` holds bare queue names; each strategy maps them onto its own
/// key namespace. Validation happens at fetch construction so that a bad
/// configuration fails fast instead of on the first poll.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Queue names to probe. Duplicates act as weights unless `strict`.
    pub queues: Vec<String>,
    /// Probe queues in exact given order instead of shuffling.
    pub strict: bool,
    /// Blocking timeout for FIFO list pops.
    ///
    /// Only meaningful for [`BasicFetch`](crate::fetch::BasicFetch); the
    /// priority claim is a server-side script and returns immediately
    /// regardless of this value.
    pub fifo_timeout: Duration,
    /// Minimum interval between orphan scans across the whole fleet.
    /// Zero disables the scan.
    pub orphan_check_cooldown: Duration,
    /// Expiry on the process liveness marker; refreshed every heartbeat.
    pub heartbeat_ttl: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            queues: vec!["default".to_string()],
            strict: false,
            fifo_timeout: Duration::from_secs(2),
            orphan_check_cooldown: Duration::from_secs(3600),
            heartbeat_ttl: Duration::from_secs(60),
        }
    }
}

impl FetchConfig {
    /// Creates a configuration for the given queue names.
    pub fn new(queues: Vec<String>) -> Self {
        Self {
            queues,
            ..Default::default()
        }
    }

    /// Enables strict (exact caller-given) probe ordering.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the FIFO blocking timeout.
    pub fn with_fifo_timeout(mut self, timeout: Duration) -> Self {
        self.fifo_timeout = timeout;
        self
    }

    /// Sets the orphan scan cooldown. Zero disables the scan.
    pub fn with_orphan_check_cooldown(mut self, cooldown: Duration) -> Self {
        self.orphan_check_cooldown = cooldown;
        self
    }

    /// Sets the liveness marker TTL.
    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.queues.is_empty() {
            return Err(FetchError::Config("queue list is empty".to_string()));
        }
        if self.queues.iter().any(|q| q.is_empty()) {
            return Err(FetchError::Config("queue name is empty".to_string()));
        }
        Ok(())
    }
}
