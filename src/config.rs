//! # SchedulerConfig
//!
//! Configuration options for the tournament coordinator and its worker
//! pool: parallelism, CPU-time budget, retry limits, tournament sizing,
//! racing, and the result chunk size.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use racetune::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::builder()
//!     .parallelism(8)
//!     .cpu_budget(Duration::from_secs(30))
//!     .tournament_size(4)
//!     .racing_enabled(true)
//!     .build();
//!
//! assert_eq!(config.parallelism(), 8);
//! ```

use std::time::Duration;

use crate::error::{Result, TuningError};

/// Configuration options for a tournament batch.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    parallelism: usize,
    cpu_budget: Duration,
    max_consecutive_failures: usize,
    min_ready_workers: usize,
    tournament_size: usize,
    racing_enabled: bool,
    chunk_size: usize,
}

impl SchedulerConfig {
    /// Number of concurrent worker slots.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// CPU-time budget per evaluation.
    pub fn cpu_budget(&self) -> Duration {
        self.cpu_budget
    }

    /// Consecutive faults tolerated per genome before escalation.
    pub fn max_consecutive_failures(&self) -> usize {
        self.max_consecutive_failures
    }

    /// Workers that must register before buffered commands are dispatched.
    pub fn min_ready_workers(&self) -> usize {
        self.min_ready_workers
    }

    /// Number of genomes per mini tournament.
    pub fn tournament_size(&self) -> usize {
        self.tournament_size
    }

    /// Whether racing cancellation is applied.
    pub fn racing_enabled(&self) -> bool {
        self.racing_enabled
    }

    /// Maximum number of results per chunk message.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns a builder for creating a `SchedulerConfig` instance.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Validates the configuration before a batch is started.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(TuningError::Configuration(
                "worker parallelism cannot be zero".to_string(),
            ));
        }
        if self.tournament_size == 0 {
            return Err(TuningError::Configuration(
                "tournament size cannot be zero".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(TuningError::Configuration(
                "at least one evaluation attempt is required".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(TuningError::Configuration(
                "result chunk size cannot be zero".to_string(),
            ));
        }
        if self.cpu_budget.is_zero() {
            return Err(TuningError::Configuration(
                "CPU-time budget cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            cpu_budget: Duration::from_secs(60),
            max_consecutive_failures: 3,
            min_ready_workers: 1,
            tournament_size: 8,
            racing_enabled: true,
            chunk_size: 50,
        }
    }
}

/// Builder for `SchedulerConfig`.
///
/// Provides a fluent interface for constructing `SchedulerConfig`
/// instances; unset fields fall back to the defaults.
#[derive(Clone, Debug, Default)]
pub struct SchedulerConfigBuilder {
    parallelism: Option<usize>,
    cpu_budget: Option<Duration>,
    max_consecutive_failures: Option<usize>,
    min_ready_workers: Option<usize>,
    tournament_size: Option<usize>,
    racing_enabled: Option<bool>,
    chunk_size: Option<usize>,
}

impl SchedulerConfigBuilder {
    /// Sets the number of concurrent worker slots.
    pub fn parallelism(mut self, value: usize) -> Self {
        self.parallelism = Some(value);
        self
    }

    /// Sets the CPU-time budget per evaluation.
    pub fn cpu_budget(mut self, value: Duration) -> Self {
        self.cpu_budget = Some(value);
        self
    }

    /// Sets the consecutive-fault limit per genome.
    pub fn max_consecutive_failures(mut self, value: usize) -> Self {
        self.max_consecutive_failures = Some(value);
        self
    }

    /// Sets the number of workers that must register before dispatch.
    pub fn min_ready_workers(mut self, value: usize) -> Self {
        self.min_ready_workers = Some(value);
        self
    }

    /// Sets the number of genomes per mini tournament.
    pub fn tournament_size(mut self, value: usize) -> Self {
        self.tournament_size = Some(value);
        self
    }

    /// Enables or disables racing cancellation.
    pub fn racing_enabled(mut self, value: bool) -> Self {
        self.racing_enabled = Some(value);
        self
    }

    /// Sets the maximum number of results per chunk message.
    pub fn chunk_size(mut self, value: usize) -> Self {
        self.chunk_size = Some(value);
        self
    }

    /// Builds the `SchedulerConfig` instance.
    pub fn build(self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            parallelism: self.parallelism.unwrap_or(defaults.parallelism),
            cpu_budget: self.cpu_budget.unwrap_or(defaults.cpu_budget),
            max_consecutive_failures: self
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
            min_ready_workers: self.min_ready_workers.unwrap_or(defaults.min_ready_workers),
            tournament_size: self.tournament_size.unwrap_or(defaults.tournament_size),
            racing_enabled: self.racing_enabled.unwrap_or(defaults.racing_enabled),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_falls_back_to_defaults() {
        let config = SchedulerConfig::builder().parallelism(16).build();
        let defaults = SchedulerConfig::default();

        assert_eq!(config.parallelism(), 16);
        assert_eq!(config.cpu_budget(), defaults.cpu_budget());
        assert_eq!(config.tournament_size(), defaults.tournament_size());
        assert_eq!(config.chunk_size(), 50);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::builder()
            .parallelism(0)
            .build()
            .validate()
            .is_err());
        assert!(SchedulerConfig::builder()
            .tournament_size(0)
            .build()
            .validate()
            .is_err());
        assert!(SchedulerConfig::builder()
            .max_consecutive_failures(0)
            .build()
            .validate()
            .is_err());
        assert!(SchedulerConfig::builder()
            .chunk_size(0)
            .build()
            .validate()
            .is_err());
        assert!(SchedulerConfig::builder()
            .cpu_budget(Duration::ZERO)
            .build()
            .validate()
            .is_err());
    }
}
