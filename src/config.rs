use crate::error::{ConductorError, Result};

/// Engine-wide configuration with environment overrides
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Number of workers spawned by the pool (default: host core count)
    pub max_workers: usize,
    /// Combined capacity of the priority and FIFO queues
    pub queue_capacity: usize,
    /// Fallback tick for the poll loop; enqueue/completion wakes are edge-driven
    pub poll_interval_ms: u64,
    /// Pipeline-wide default when a stage sets no retry bound
    pub default_max_retries: u32,
    /// Fixed delay between stage retry attempts
    pub retry_delay_ms: u64,
    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_worker_count(),
            queue_capacity: 1000,
            poll_interval_ms: 50,
            default_max_retries: 3,
            retry_delay_ms: 100,
            event_channel_capacity: 1024,
        }
    }
}

impl ConductorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(max_workers) = std::env::var("CONDUCTOR_MAX_WORKERS") {
            config.max_workers = max_workers.parse().map_err(|e| {
                ConductorError::Configuration(format!("invalid max_workers: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("CONDUCTOR_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.parse().map_err(|e| {
                ConductorError::Configuration(format!("invalid queue_capacity: {e}"))
            })?;
        }

        if let Ok(interval) = std::env::var("CONDUCTOR_POLL_INTERVAL_MS") {
            config.poll_interval_ms = interval.parse().map_err(|e| {
                ConductorError::Configuration(format!("invalid poll_interval_ms: {e}"))
            })?;
        }

        if let Ok(retries) = std::env::var("CONDUCTOR_RETRY_LIMIT") {
            config.default_max_retries = retries.parse().map_err(|e| {
                ConductorError::Configuration(format!("invalid retry limit: {e}"))
            })?;
        }

        if let Ok(delay) = std::env::var("CONDUCTOR_RETRY_DELAY_MS") {
            config.retry_delay_ms = delay.parse().map_err(|e| {
                ConductorError::Configuration(format!("invalid retry_delay_ms: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ConductorError::Configuration(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConductorError::Configuration(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
