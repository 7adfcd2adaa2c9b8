//! Reactor configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (`from_env()` only)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use spindle_runtime::config::ReactorConfig;
//!
//! let config = ReactorConfig::from_env()
//!     .task_batch(64)
//!     .timer_interval(Duration::from_millis(500));
//! ```

pub mod defaults;

use spindle_core::env::parse_or;
use std::time::Duration;

/// Reactor configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Readiness events fetched per poll
    pub max_events: usize,
    /// Max cross-thread tasks drained per iteration
    pub task_batch: usize,
    /// Pump receive spare capacity per read
    pub recv_chunk: usize,
    /// Initial pump buffer capacity
    pub buffer_capacity: usize,
    /// Default timer interval
    pub timer_interval: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SPINDLE_MAX_EVENTS` - Readiness events per poll
    /// - `SPINDLE_TASK_BATCH` - Tasks drained per iteration
    /// - `SPINDLE_RECV_CHUNK` - Pump receive chunk in bytes
    /// - `SPINDLE_BUFFER_CAPACITY` - Initial pump buffer capacity
    /// - `SPINDLE_TIMER_INTERVAL_MS` - Default timer interval
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading overrides through `lookup` instead of the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: usize| parse_or(lookup(key).as_deref(), default);
        Self {
            max_events: get("SPINDLE_MAX_EVENTS", defaults::MAX_EVENTS),
            task_batch: get("SPINDLE_TASK_BATCH", defaults::TASK_BATCH),
            recv_chunk: get("SPINDLE_RECV_CHUNK", defaults::RECV_CHUNK),
            buffer_capacity: get("SPINDLE_BUFFER_CAPACITY", defaults::BUFFER_CAPACITY),
            timer_interval: Duration::from_millis(parse_or(
                lookup("SPINDLE_TIMER_INTERVAL_MS").as_deref(),
                defaults::TIMER_INTERVAL_MS,
            )),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_events: defaults::MAX_EVENTS,
            task_batch: defaults::TASK_BATCH,
            recv_chunk: defaults::RECV_CHUNK,
            buffer_capacity: defaults::BUFFER_CAPACITY,
            timer_interval: Duration::from_millis(defaults::TIMER_INTERVAL_MS),
        }
    }

    // Builder methods

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn task_batch(mut self, n: usize) -> Self {
        self.task_batch = n;
        self
    }

    pub fn recv_chunk(mut self, n: usize) -> Self {
        self.recv_chunk = n;
        self
    }

    pub fn buffer_capacity(mut self, n: usize) -> Self {
        self.buffer_capacity = n;
        self
    }

    pub fn timer_interval(mut self, d: Duration) -> Self {
        self.timer_interval = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue("max_events must be > 0"));
        }
        if self.task_batch == 0 {
            return Err(ConfigError::InvalidValue("task_batch must be > 0"));
        }
        if self.recv_chunk == 0 {
            return Err(ConfigError::InvalidValue("recv_chunk must be > 0"));
        }
        if self.timer_interval.is_zero() {
            return Err(ConfigError::InvalidValue("timer_interval must be > 0"));
        }
        Ok(())
    }

    /// Log the configuration at debug level.
    pub fn log(&self) {
        log::debug!(
            "reactor config: max_events={} task_batch={} recv_chunk={} buffer_capacity={} timer_interval={:?}",
            self.max_events,
            self.task_batch,
            self.recv_chunk,
            self.buffer_capacity,
            self.timer_interval
        );
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = ReactorConfig::new();
        assert_eq!(config.max_events, defaults::MAX_EVENTS);
        assert_eq!(config.timer_interval, Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::new()
            .task_batch(8)
            .recv_chunk(512)
            .timer_interval(Duration::from_millis(50));

        assert_eq!(config.task_batch, 8);
        assert_eq!(config.recv_chunk, 512);
        assert_eq!(config.timer_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_validation() {
        assert!(ReactorConfig::new().max_events(0).validate().is_err());
        assert!(ReactorConfig::new().task_batch(0).validate().is_err());
        assert!(ReactorConfig::new()
            .timer_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_override() {
        let config = ReactorConfig::from_lookup(|key| match key {
            "SPINDLE_RECV_CHUNK" => Some("1234".to_string()),
            "SPINDLE_TIMER_INTERVAL_MS" => Some("75".to_string()),
            "SPINDLE_TASK_BATCH" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.recv_chunk, 1234);
        assert_eq!(config.timer_interval, Duration::from_millis(75));
        assert_eq!(config.task_batch, defaults::TASK_BATCH);
        assert_eq!(config.max_events, defaults::MAX_EVENTS);
    }
}
