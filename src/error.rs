//! # Error Types
//!
//! This module defines custom error types for the evaluation scheduler.
//! It provides specific error variants for the failure scenarios that may
//! occur while a batch of evaluations is scheduled, raced and executed.
//!
//! Bookkeeping mutations (see [`crate::stats::GenomeStats`]) deliberately do
//! *not* use these types: concurrent callers routinely race to mutate the
//! same genome's state, so a failed transition is reported as a plain
//! `bool` and treated as a normal outcome. `TuningError` is reserved for
//! conditions that must stop or abort a tournament batch.
//!
//! ## Examples
//!
//! Using the `Result` type:
//!
//! ```rust
//! use racetune::error::{Result, TuningError};
//!
//! fn checked_parallelism(workers: usize) -> Result<usize> {
//!     if workers == 0 {
//!         return Err(TuningError::Configuration(
//!             "worker parallelism cannot be zero".to_string(),
//!         ));
//!     }
//!     Ok(workers)
//! }
//!
//! assert!(checked_parallelism(0).is_err());
//! assert_eq!(checked_parallelism(4).unwrap(), 4);
//! ```
//!
//! Using the `ResultExt` trait to add context to errors:
//!
//! ```rust
//! use racetune::error::{Result, ResultExt};
//!
//! fn parse_budget(raw: &str) -> Result<u64> {
//!     raw.parse::<u64>().context("Failed to parse evaluation budget")
//! }
//!
//! assert!(parse_budget("not-a-number").is_err());
//! ```

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Error raised by a target-algorithm run.
///
/// Carried inside [`TuningError::EvaluationFailed`] once a worker has
/// exhausted its retry budget for one genome; before that point faults are
/// only logged and retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TargetError(pub String);

/// Represents errors that can occur while scheduling and executing
/// evaluations.
///
/// This enum provides specific error variants for the different failure
/// scenarios that may occur during a tournament batch.
#[derive(Error, Debug)]
pub enum TuningError {
    /// Error that occurs when an invalid configuration is provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error that occurs when a worker has exhausted its retry budget for
    /// one (genome, instance) evaluation. The genome and instance are
    /// rendered by value so the failing run can be reproduced.
    #[error(
        "Evaluation failed: genome {genome} on instance {instance} faulted \
         {attempts} consecutive times, last fault: {fault}"
    )]
    EvaluationFailed {
        /// The offending genome, rendered by value.
        genome: String,
        /// The offending instance, rendered by value.
        instance: String,
        /// Number of consecutive faulted attempts.
        attempts: usize,
        /// The last fault reported by the target algorithm.
        fault: TargetError,
    },

    /// Error that occurs when the bookkeeping reports a state that the
    /// scheduler's invariants rule out. Indicates a bug rather than an
    /// environmental failure; the tournament batch is aborted.
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    /// Error that occurs when every worker channel has disconnected while
    /// evaluations were still outstanding.
    #[error("Scheduler disconnected: {0}")]
    Disconnected(String),

    /// A generic error with a custom message.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for scheduler operations.
///
/// This type is a convenience wrapper around `std::result::Result` with the
/// error type fixed to `TuningError`.
pub type Result<T> = std::result::Result<T, TuningError>;

/// Extension trait for Result to add context to errors.
///
/// This trait provides a convenient way to add context to errors when
/// converting from one error type to `TuningError`.
///
/// ## Examples
///
/// ```rust
/// use racetune::error::ResultExt;
///
/// fn read_generation(raw: &str) -> racetune::error::Result<u64> {
///     raw.parse::<u64>().context("Failed to read generation counter")
/// }
/// ```
pub trait ResultExt<T, E> {
    /// Adds context to an error.
    ///
    /// This method converts the error to a `TuningError` with the provided
    /// context.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| TuningError::Other(format!("{}: {}", context, e)))
    }
}
