//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum batch size served by one pull response.
    pub max_pull_batch: u32,
    /// Maximum number of operations accepted in one push.
    pub max_push_batch: u32,
    /// Maximum number of operations accepted in one full-state push.
    ///
    /// Full-state uploads carry a device's entire entity set, so the cap is
    /// higher than for incremental pushes.
    pub max_full_push_batch: u32,
}

impl ServerConfig {
    /// Creates a configuration with the given incremental batch caps.
    pub fn new(max_pull_batch: u32, max_push_batch: u32) -> Self {
        Self {
            max_pull_batch,
            max_push_batch,
            max_full_push_batch: max_push_batch.saturating_mul(100),
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum full-state push batch size.
    pub fn with_max_full_push_batch(mut self, size: u32) -> Self {
        self.max_full_push_batch = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(100, 100)
    }
}
