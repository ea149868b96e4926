//! # Result Storage
//!
//! Process-wide cache of completed evaluation results, keyed by
//! (genome value, instance value). Deduplicates evaluations across
//! tournaments and generations: before dispatching a pair the coordinator
//! consults the storage, and a hit bypasses the worker pool entirely.
//!
//! Entries are write-once. A second store for the same key is silently
//! ignored (first writer wins), which makes concurrent re-submission from
//! sibling tournaments safe without any cross-tournament coordination.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::evaluation::EvaluationResult;
use crate::genome::{Genome, Instance};

/// Counts reported by [`ResultStorage::evaluation_statistic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluationStatistic {
    /// Number of distinct genome values with at least one stored result.
    pub distinct_configuration_count: usize,
    /// Total number of stored (genome, instance) results.
    pub total_evaluation_count: usize,
}

impl fmt::Display for EvaluationStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} evaluations over {} distinct configurations",
            self.total_evaluation_count, self.distinct_configuration_count
        )
    }
}

/// Shared map from (genome value, instance) to a completed result.
///
/// Interior mutability behind a `Mutex` so many tournaments can write
/// concurrently through an `Arc<ResultStorage>`; conflicting writes to the
/// same key resolve to the first writer.
#[derive(Debug, Default)]
pub struct ResultStorage<G, I>
where
    G: Genome,
    I: Instance,
{
    results: Mutex<HashMap<G, HashMap<I, EvaluationResult>>>,
}

impl<G, I> ResultStorage<G, I>
where
    G: Genome,
    I: Instance,
{
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a result for the pair, unless one already exists.
    ///
    /// First writer wins; a duplicate store returns without error either
    /// way.
    pub fn store(&self, genome: G, instance: I, result: EvaluationResult) {
        let mut results = self.results.lock().expect("result storage poisoned");
        results
            .entry(genome)
            .or_default()
            .entry(instance)
            .or_insert(result);
    }

    /// Looks up the cached result for one pair.
    pub fn result_for(&self, genome: &G, instance: &I) -> Option<EvaluationResult> {
        let results = self.results.lock().expect("result storage poisoned");
        results
            .get(genome)
            .and_then(|per_instance| per_instance.get(instance))
            .cloned()
    }

    /// Returns all cached results whose key's genome compares equal by
    /// value to the query genome, regardless of the query genome's age or
    /// gene-insertion order.
    pub fn genome_results(&self, genome: &G) -> HashMap<I, EvaluationResult> {
        let results = self.results.lock().expect("result storage poisoned");
        results.get(genome).cloned().unwrap_or_default()
    }

    /// Returns every cached result, grouped by distinct genome value.
    pub fn all_results(&self) -> HashMap<G, HashMap<I, EvaluationResult>> {
        self.results.lock().expect("result storage poisoned").clone()
    }

    /// Telemetry counts over the cache contents.
    pub fn evaluation_statistic(&self) -> EvaluationStatistic {
        let results = self.results.lock().expect("result storage poisoned");
        EvaluationStatistic {
            distinct_configuration_count: results.len(),
            total_evaluation_count: results.values().map(HashMap::len).sum(),
        }
    }
}
