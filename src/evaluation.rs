//! # Evaluation Results and the Target-Algorithm Seam
//!
//! This module defines the outcome type of a single (genome, instance)
//! run, the [`TargetRunner`] trait the scheduler calls into, and the
//! cooperative [`CancelToken`] handed to every run.
//!
//! A run that exceeds its CPU-time budget is *not* an error: it produces a
//! well-formed result with [`EvaluationStatus::Cancelled`] whose runtime is
//! the exact configured budget, not the wall time at which the abort was
//! observed. Faults (the target algorithm throwing) are retried by the
//! worker and only surface as [`EvaluationStatus::Faulted`] once the retry
//! budget is exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TargetError;
use crate::genome::{Genome, Instance};

/// Outcome category of a single evaluation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvaluationStatus {
    /// The target algorithm ran to completion within its budget.
    Finished,
    /// The run was cut off, either by budget expiry or by an external
    /// cancellation request.
    Cancelled,
    /// The target algorithm faulted and the retry budget was exhausted.
    Faulted,
}

/// Outcome of running the target algorithm on one (genome, instance) pair.
///
/// Immutable once produced.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluationResult {
    status: EvaluationStatus,
    runtime: Duration,
    objective: f64,
}

impl EvaluationResult {
    /// A completed run with its measured runtime and objective value.
    pub fn finished(runtime: Duration, objective: f64) -> Self {
        Self {
            status: EvaluationStatus::Finished,
            runtime,
            objective,
        }
    }

    /// A cancelled run. Carries the budget at which it was cut off, not
    /// the wall time of the actual abort.
    pub fn cancelled(budget: Duration) -> Self {
        Self {
            status: EvaluationStatus::Cancelled,
            runtime: budget,
            objective: f64::INFINITY,
        }
    }

    /// A run whose retry budget was exhausted by consecutive faults.
    pub fn faulted(runtime: Duration) -> Self {
        Self {
            status: EvaluationStatus::Faulted,
            runtime,
            objective: f64::INFINITY,
        }
    }

    /// The outcome category of the run.
    pub fn status(&self) -> EvaluationStatus {
        self.status
    }

    /// Elapsed runtime; for cancelled runs, the configured budget.
    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    /// Algorithm-specific objective payload. Cancelled and faulted runs
    /// report `f64::INFINITY` (worst possible, minimization convention).
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Whether the run completed within its budget.
    pub fn is_finished(&self) -> bool {
        self.status == EvaluationStatus::Finished
    }

    /// Whether the run was cut off by budget expiry or cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.status == EvaluationStatus::Cancelled
    }
}

/// Cooperative cancellation handle shared between the scheduler and an
/// in-flight target-algorithm run.
///
/// Cancellation is a one-way latch: once cancelled, a token stays
/// cancelled. Runners are expected to check [`CancelToken::is_cancelled`]
/// at convenient points and return early when it trips.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the associated run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Adapter to the external target algorithm.
///
/// One run evaluates a genome's parameter values on a single instance and
/// reports an objective value (minimization convention). The run must
/// observe its [`CancelToken`] and return promptly once cancellation is
/// requested; the value returned after cancellation is discarded.
///
/// Implementations are shared across worker threads.
pub trait TargetRunner<G, I>: Send + Sync + 'static
where
    G: Genome,
    I: Instance,
{
    /// Runs the target algorithm once.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] if the invocation faults. Faults are
    /// transient from the scheduler's point of view and retried by the
    /// worker up to its consecutive-failure limit.
    fn run(&self, genome: &G, instance: &I, token: &CancelToken)
        -> std::result::Result<f64, TargetError>;
}
