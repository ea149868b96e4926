//! # Genome Bookkeeping
//!
//! Per-genome ledger of which instances are open, running, finished or
//! cancelled for one tournament. Every instance belongs to exactly one of
//! the four sets at all times; the legal transitions are
//! `Open -> Running -> Finished` and `Open | Running -> CancelledByRacing`
//! (terminal).
//!
//! All mutation methods return a `bool` success flag rather than an error:
//! concurrent completions routinely race to mutate the same genome's state
//! (a worker reporting late, a racing cancellation landing first), and a
//! failed transition is a normal, expected outcome the caller logs and
//! moves past.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::evaluation::{EvaluationResult, EvaluationStatus};
use crate::genome::{Genome, Instance};

/// Per-genome, per-tournament instance bookkeeping.
#[derive(Clone, Debug)]
pub struct GenomeStats<G, I>
where
    G: Genome,
    I: Instance,
{
    genome: G,
    open: HashSet<I>,
    running: HashSet<I>,
    finished: HashMap<I, EvaluationResult>,
    cancelled_by_racing: HashSet<I>,
}

impl<G, I> GenomeStats<G, I>
where
    G: Genome,
    I: Instance,
{
    /// Creates bookkeeping for a genome with its initially open instances
    /// and any instances already known to be running (carried over from a
    /// previous retry wave).
    pub fn new(
        genome: G,
        open: impl IntoIterator<Item = I>,
        running: impl IntoIterator<Item = I>,
    ) -> Self {
        let running: HashSet<I> = running.into_iter().collect();
        let open = open
            .into_iter()
            .filter(|instance| !running.contains(instance))
            .collect();
        Self {
            genome,
            open,
            running,
            finished: HashMap::new(),
            cancelled_by_racing: HashSet::new(),
        }
    }

    /// The genome this ledger belongs to.
    pub fn genome(&self) -> &G {
        &self.genome
    }

    /// Adds an instance as open work if it is not yet accounted for in any
    /// of the four sets. Returns `false` if the instance is already
    /// tracked.
    pub fn open_instance(&mut self, instance: I) -> bool {
        if self.running.contains(&instance)
            || self.finished.contains_key(&instance)
            || self.cancelled_by_racing.contains(&instance)
        {
            return false;
        }
        self.open.insert(instance)
    }

    /// Moves one arbitrary open instance to running and returns it, or
    /// `None` if no open instance remains.
    pub fn try_start_instance(&mut self) -> Option<I> {
        let instance = self.open.iter().next().cloned()?;
        self.open.remove(&instance);
        self.running.insert(instance.clone());
        Some(instance)
    }

    /// Moves a specific open instance to running. Returns `false` if the
    /// instance is not open.
    pub fn start_instance(&mut self, instance: &I) -> bool {
        if !self.open.remove(instance) {
            return false;
        }
        self.running.insert(instance.clone());
        true
    }

    /// Moves a running instance to finished with its result.
    ///
    /// Returns `false` if the instance was not running: already finished,
    /// cancelled, or never started. This is the defense against duplicate
    /// and late completions.
    pub fn finish_instance(&mut self, instance: &I, result: EvaluationResult) -> bool {
        if !self.running.remove(instance) {
            return false;
        }
        self.finished.insert(instance.clone(), result);
        true
    }

    /// Moves a running instance back to open, used when the worker
    /// evaluating it was lost. Returns `false` if the instance is not
    /// running.
    pub fn requeue_instance(&mut self, instance: &I) -> bool {
        if !self.running.remove(instance) {
            return false;
        }
        self.open.insert(instance.clone());
        true
    }

    /// Moves everything open or running into the terminal
    /// cancelled-by-racing set.
    ///
    /// Returns `false` if both source sets were already empty, so a second
    /// racing decision against the same genome is a no-op.
    pub fn update_cancelled_by_racing(&mut self) -> bool {
        if self.open.is_empty() && self.running.is_empty() {
            return false;
        }
        self.cancelled_by_racing.extend(self.open.drain());
        self.cancelled_by_racing.extend(self.running.drain());
        true
    }

    /// Whether any instance is still waiting to be started.
    pub fn has_open_instances(&self) -> bool {
        !self.open.is_empty()
    }

    /// Whether any instance is still open or dispatched to a worker. A
    /// genome for which this is `false` is fully accounted for: either
    /// racing-killed or finished on every instance.
    pub fn has_open_or_running_instances(&self) -> bool {
        !self.open.is_empty() || !self.running.is_empty()
    }

    /// Total number of instances tracked across all four sets.
    pub fn total_instance_count(&self) -> usize {
        self.open.len() + self.running.len() + self.finished.len() + self.cancelled_by_racing.len()
    }

    /// Number of instances still open.
    pub fn open_instance_count(&self) -> usize {
        self.open.len()
    }

    /// Number of instances currently dispatched to workers.
    pub fn running_instance_count(&self) -> usize {
        self.running.len()
    }

    /// Sum of the runtimes of all finished results.
    pub fn runtime_of_finished_instances(&self) -> Duration {
        self.finished.values().map(EvaluationResult::runtime).sum()
    }

    /// Whether this genome was killed early by racing.
    pub fn is_cancelled_by_racing(&self) -> bool {
        !self.cancelled_by_racing.is_empty()
    }

    /// Whether every tracked instance finished and none of the results was
    /// a budget-cancelled run.
    pub fn all_instances_finished_without_cancelled_result(&self) -> bool {
        self.open.is_empty()
            && self.running.is_empty()
            && self.cancelled_by_racing.is_empty()
            && self
                .finished
                .values()
                .all(|result| result.status() != EvaluationStatus::Cancelled)
    }

    /// The finished results collected so far, keyed by instance.
    pub fn finished_results(&self) -> &HashMap<I, EvaluationResult> {
        &self.finished
    }

    /// The instances forcibly abandoned by racing.
    pub fn cancelled_instances(&self) -> &HashSet<I> {
        &self.cancelled_by_racing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct TestGenome(u32);

    impl Genome for TestGenome {
        fn age(&self) -> u64 {
            0
        }
    }

    fn stats_with_open(n: u32) -> GenomeStats<TestGenome, u32> {
        GenomeStats::new(TestGenome(1), 0..n, std::iter::empty())
    }

    #[test]
    fn test_start_all_then_finish_all() {
        let mut stats = stats_with_open(5);

        let mut started = Vec::new();
        for _ in 0..5 {
            started.push(stats.try_start_instance().unwrap());
        }
        assert!(!stats.has_open_instances());
        assert!(stats.has_open_or_running_instances());
        assert!(stats.try_start_instance().is_none());

        let mut expected_total = Duration::ZERO;
        for (step, instance) in started.iter().enumerate() {
            let runtime = Duration::from_millis(10 * (step as u64 + 1));
            expected_total += runtime;
            assert!(stats.finish_instance(instance, EvaluationResult::finished(runtime, 1.0)));
            assert_eq!(stats.runtime_of_finished_instances(), expected_total);
        }

        assert!(!stats.has_open_or_running_instances());
        assert!(stats.all_instances_finished_without_cancelled_result());
        assert_eq!(stats.total_instance_count(), 5);
    }

    #[test]
    fn test_finish_on_open_instance_fails() {
        let mut stats = stats_with_open(2);
        // Instance 0 was never started.
        assert!(!stats.finish_instance(&0, EvaluationResult::finished(Duration::ZERO, 0.0)));
        assert_eq!(stats.open_instance_count(), 2);
    }

    #[test]
    fn test_requeue_on_open_instance_fails() {
        let mut stats = stats_with_open(2);
        assert!(!stats.requeue_instance(&0));

        let started = stats.try_start_instance().unwrap();
        assert!(stats.requeue_instance(&started));
        assert_eq!(stats.open_instance_count(), 2);
        assert_eq!(stats.running_instance_count(), 0);
    }

    #[test]
    fn test_duplicate_finish_fails() {
        let mut stats = stats_with_open(1);
        let instance = stats.try_start_instance().unwrap();
        assert!(stats.finish_instance(&instance, EvaluationResult::finished(Duration::ZERO, 0.0)));
        assert!(!stats.finish_instance(&instance, EvaluationResult::finished(Duration::ZERO, 0.0)));
    }

    #[test]
    fn test_cancelled_by_racing_moves_open_and_running() {
        let mut stats = stats_with_open(4);
        let started = stats.try_start_instance().unwrap();
        assert_eq!(stats.open_instance_count(), 3);
        assert_eq!(stats.running_instance_count(), 1);

        assert!(stats.update_cancelled_by_racing());
        assert!(stats.is_cancelled_by_racing());
        assert_eq!(stats.cancelled_instances().len(), 4);
        assert!(!stats.has_open_or_running_instances());

        // Idempotence guard: both source sets are already empty.
        assert!(!stats.update_cancelled_by_racing());

        // A worker still reporting the in-flight instance is rejected.
        assert!(!stats.finish_instance(&started, EvaluationResult::finished(Duration::ZERO, 0.0)));
    }

    #[test]
    fn test_cancelled_result_blocks_clean_finish_flag() {
        let mut stats = stats_with_open(2);
        let first = stats.try_start_instance().unwrap();
        let second = stats.try_start_instance().unwrap();
        stats.finish_instance(&first, EvaluationResult::finished(Duration::from_millis(5), 1.0));
        stats.finish_instance(&second, EvaluationResult::cancelled(Duration::from_secs(1)));

        assert!(!stats.has_open_or_running_instances());
        assert!(!stats.all_instances_finished_without_cancelled_result());
    }

    #[test]
    fn test_open_instance_rejects_tracked_instances() {
        let mut stats = stats_with_open(1);
        assert!(!stats.open_instance(0));

        let started = stats.try_start_instance().unwrap();
        assert!(!stats.open_instance(started));

        assert!(stats.open_instance(99));
        assert_eq!(stats.total_instance_count(), 2);
    }

    #[test]
    fn test_carried_over_running_instances() {
        let stats: GenomeStats<TestGenome, u32> =
            GenomeStats::new(TestGenome(1), vec![0, 1, 2], vec![2, 3]);

        // Instance 2 is running, not open twice.
        assert_eq!(stats.open_instance_count(), 2);
        assert_eq!(stats.running_instance_count(), 2);
        assert_eq!(stats.total_instance_count(), 4);
    }
}
