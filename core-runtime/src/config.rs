//! # Engine Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! [`EngineConfig`] holding the tunables of every component: the resolver's
//! fuzzy matching, circuit breaking, retry backoff, the job queue, pagination
//! limits and the periodic workers. Every settings struct has a `Default`
//! with production values, and [`EngineConfigBuilder::build`] validates the
//! whole configuration before anything is started, so misconfiguration fails
//! fast with an actionable message.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{EngineConfig, QueueSettings};
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .queue(QueueSettings::default().with_max_concurrent(2))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```
//! use core_runtime::config::{EngineConfig, ResolverSettings};
//!
//! let result = EngineConfig::builder()
//!     .resolver(ResolverSettings::default().with_fuzzy_threshold(1.5))
//!     .build();
//!
//! assert_eq!(result.unwrap_err().section(), Some("resolver"));
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Component Settings
// ============================================================================

/// Entity resolution tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Minimum normalized similarity for a fuzzy name match, in (0, 1]
    pub fuzzy_threshold: f64,
    /// Normalized names shorter than this never fuzzy match
    pub fuzzy_min_name_len: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.90,
            fuzzy_min_name_len: 4,
        }
    }
}

impl ResolverSettings {
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn with_fuzzy_min_name_len(mut self, len: usize) -> Self {
        self.fuzzy_min_name_len = len;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fuzzy_threshold > 0.0 && self.fuzzy_threshold <= 1.0) {
            return Err(Error::invalid(
                "resolver",
                format!("fuzzy threshold must be in (0, 1], got {}", self.fuzzy_threshold),
            ));
        }
        Ok(())
    }
}

/// Per-provider circuit breaker tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Initial open period
    pub cooldown: Duration,
    /// Growth of the open period after a failed half-open trial
    pub cooldown_multiplier: f64,
    /// Upper bound for the open period
    pub max_cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            cooldown_multiplier: 2.0,
            max_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

impl BreakerSettings {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_cooldown_multiplier(mut self, multiplier: f64) -> Self {
        self.cooldown_multiplier = multiplier;
        self
    }

    pub fn with_max_cooldown(mut self, max: Duration) -> Self {
        self.max_cooldown = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::invalid("breaker", "failure threshold must be at least 1"));
        }
        if !(self.cooldown_multiplier >= 1.0) {
            return Err(Error::invalid(
                "breaker",
                format!(
                    "cooldown multiplier must be >= 1.0, got {}",
                    self.cooldown_multiplier
                ),
            ));
        }
        if self.max_cooldown < self.cooldown {
            return Err(Error::invalid(
                "breaker",
                "max cooldown must not be shorter than the base cooldown",
            ));
        }
        Ok(())
    }
}

/// Retry backoff for transient failures inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Attempts for a single unit of work
    pub max_attempts: u32,
    /// Attempts for batch-style operations
    pub batch_max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
            batch_max_attempts: 5,
        }
    }
}

impl RetrySettings {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_factor > 1.0) {
            return Err(Error::invalid(
                "retry",
                format!("backoff factor must be > 1.0, got {}", self.backoff_factor),
            ));
        }
        if self.max_attempts == 0 || self.batch_max_attempts == 0 {
            return Err(Error::invalid("retry", "attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Background job queue tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Jobs allowed to run at once. SQLite has a single writer, so the default is 1.
    pub max_concurrent: usize,
    /// Attempts granted to jobs enqueued without an explicit limit
    pub default_max_attempts: u32,
    /// Delay before the first retry of a failed job
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
    /// How often the dispatcher looks for due jobs when idle
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            default_max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl QueueSettings {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::invalid("queue", "concurrency must be at least 1"));
        }
        if self.default_max_attempts == 0 {
            return Err(Error::invalid("queue", "job max attempts must be at least 1"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::invalid(
                "queue",
                "backoff max must not be shorter than the base delay",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid("queue", "poll interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Pagination limits for provider listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Largest page a provider may return; larger pages fail that provider
    pub page_size: u32,
    /// Hard stop for a single listing
    pub max_pages: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
        }
    }
}

impl OrchestratorSettings {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(Error::invalid(
                "orchestrator",
                "page size and max pages must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Defaults for periodic loop workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub startup_delay: Duration,
    pub interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(10),
            interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl WorkerSettings {
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid("worker", "interval must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Complete engine configuration.
///
/// Use [`EngineConfig::builder`] to construct validated instances.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Path to the SQLite database file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    pub resolver: ResolverSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub queue: QueueSettings,
    pub orchestrator: OrchestratorSettings,
    pub worker: WorkerSettings,
    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            resolver: ResolverSettings::default(),
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            queue: QueueSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            worker: WorkerSettings::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates every component's settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::invalid("engine", "database path cannot be empty"));
            }
        }

        self.resolver.validate()?;
        self.breaker.validate()?;
        self.retry.validate()?;
        self.queue.validate()?;
        self.orchestrator.validate()?;
        self.worker.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::invalid("engine", "event buffer size must be at least 1"));
        }

        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Sets the database path. Without one the engine runs in memory.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn resolver(mut self, settings: ResolverSettings) -> Self {
        self.config.resolver = settings;
        self
    }

    pub fn breaker(mut self, settings: BreakerSettings) -> Self {
        self.config.breaker = settings;
        self
    }

    pub fn retry(mut self, settings: RetrySettings) -> Self {
        self.config.retry = settings;
        self
    }

    pub fn queue(mut self, settings: QueueSettings) -> Self {
        self.config.queue = settings;
        self
    }

    pub fn orchestrator(mut self, settings: OrchestratorSettings) -> Self {
        self.config.orchestrator = settings;
        self
    }

    pub fn worker(mut self, settings: WorkerSettings) -> Self {
        self.config.worker = settings;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::builder().build().unwrap();

        assert_eq!(config.database_path, None);
        assert_eq!(config.resolver.fuzzy_threshold, 0.90);
        assert_eq!(config.resolver.fuzzy_min_name_len, 4);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(60));
        assert_eq!(config.breaker.max_cooldown, Duration::from_secs(900));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.batch_max_attempts, 5);
        assert_eq!(config.queue.max_concurrent, 1);
        assert_eq!(config.queue.default_max_attempts, 3);
        assert_eq!(config.orchestrator.page_size, 100);
        assert_eq!(config.orchestrator.max_pages, 50);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_builder_accepts_database_path() {
        let config = EngineConfig::builder()
            .database_path("/var/lib/library.db")
            .build()
            .unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/library.db"))
        );
    }

    #[test]
    fn test_rejects_empty_database_path() {
        let result = EngineConfig::builder().database_path("").build();
        assert_eq!(result.unwrap_err().section(), Some("engine"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        for threshold in [0.0, -0.5, 1.01, f64::NAN] {
            let result = EngineConfig::builder()
                .resolver(ResolverSettings::default().with_fuzzy_threshold(threshold))
                .build();
            assert!(result.is_err(), "threshold {} should be rejected", threshold);
        }

        let exact = EngineConfig::builder()
            .resolver(ResolverSettings::default().with_fuzzy_threshold(1.0))
            .build();
        assert!(exact.is_ok());
    }

    #[test]
    fn test_rejects_zero_failure_threshold() {
        let result = EngineConfig::builder()
            .breaker(BreakerSettings::default().with_failure_threshold(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_shrinking_cooldown() {
        let result = EngineConfig::builder()
            .breaker(BreakerSettings::default().with_cooldown_multiplier(0.5))
            .build();
        assert!(result.is_err());

        let result = EngineConfig::builder()
            .breaker(
                BreakerSettings::default()
                    .with_cooldown(Duration::from_secs(120))
                    .with_max_cooldown(Duration::from_secs(60)),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_flat_backoff() {
        let result = EngineConfig::builder()
            .retry(RetrySettings::default().with_backoff_factor(1.0))
            .build();
        assert!(result.is_err());

        let result = EngineConfig::builder()
            .retry(RetrySettings::default().with_max_attempts(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let result = EngineConfig::builder()
            .queue(QueueSettings::default().with_max_concurrent(0))
            .build();

        match result {
            Err(Error::InvalidSettings { section, message }) => {
                assert_eq!(section, "queue");
                assert!(message.contains("concurrency"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_pages_and_interval() {
        assert!(EngineConfig::builder()
            .orchestrator(OrchestratorSettings::default().with_max_pages(0))
            .build()
            .is_err());
        assert!(EngineConfig::builder()
            .worker(WorkerSettings::default().with_interval(Duration::ZERO))
            .build()
            .is_err());
        assert!(EngineConfig::builder().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = EngineConfig::builder()
            .queue(QueueSettings::default().with_max_concurrent(4))
            .build()
            .unwrap();
        let cloned = config.clone();
        assert_eq!(cloned, config);
    }
}
