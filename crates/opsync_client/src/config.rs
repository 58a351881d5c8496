//! Configuration for the sync engine.

use opsync_model::ClientId;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Stable identity of this device.
    pub client_id: ClientId,
    /// Server URL.
    pub server_url: String,
    /// Maximum batch size for pull operations.
    pub pull_batch_size: u32,
    /// Maximum batch size for push operations.
    pub push_batch_size: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Directory for cross-process lock files; in-process locking only when
    /// unset.
    pub lock_dir: Option<PathBuf>,
    /// Base64-wrap request bodies for transports that cannot carry raw bytes.
    pub base64_bodies: bool,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(client_id: ClientId, server_url: impl Into<String>) -> Self {
        Self {
            client_id,
            server_url: server_url.into(),
            pull_batch_size: 100,
            push_batch_size: 100,
            retry: RetryConfig::default(),
            lock_dir: None,
            base64_bodies: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the lock directory for cross-process write locking.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Enables base64 wrapping of request bodies.
    pub fn with_base64_bodies(mut self, enabled: bool) -> Self {
        self.base64_bodies = enabled;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retry schedule for transient sync failures.
///
/// Delays grow geometrically from `initial_delay` up to `max_delay`. A
/// jitter fraction is smeared on top so a fleet of devices that lost the
/// same server does not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Geometric growth factor between consecutive retries.
    pub backoff_base: u32,
    /// Fraction of the delay added as jitter; `0.0` disables it.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a schedule with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_base: 2,
            jitter: 0.25,
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: 1,
            jitter: 0.0,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the geometric growth factor.
    pub fn with_backoff_base(mut self, base: u32) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction;
        self
    }

    /// Delay to wait before `attempt` (0-indexed; the first attempt runs
    /// immediately).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let growth = self.backoff_base.saturating_pow(attempt - 1);
        let delay = self.initial_delay.saturating_mul(growth).min(self.max_delay);
        if self.jitter > 0.0 {
            delay.mul_f64(1.0 + self.jitter * jitter_fraction())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

// Clock-derived noise in [0, 1); good enough to spread retries without an
// RNG dependency.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1024) / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let client = ClientId::generate();
        let config = SyncConfig::new(client, "https://sync.example.com")
            .with_pull_batch_size(50)
            .with_push_batch_size(25)
            .with_base64_bodies(true)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.client_id, client);
        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.pull_batch_size, 50);
        assert_eq!(config.push_batch_size, 25);
        assert!(config.base64_bodies);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn no_retry_never_waits() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        for attempt in 0..4 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn delays_grow_geometrically() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_base(3)
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(900));
    }

    #[test]
    fn delay_is_capped_before_jitter() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_base(10)
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(0.25);

        for _ in 0..20 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
