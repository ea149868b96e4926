//! # Run Evaluators
//!
//! The scheduler is decoupled from ranking policy through the
//! [`RunEvaluator`] trait: it supplies the *mechanism* for queue
//! synchronization and racing cancellation, while an injected evaluator
//! decides priorities, rankings and which genomes are statistically
//! dominated enough to kill early.
//!
//! [`StandardRunEvaluator`] is the shipped default: genomes dequeue in
//! ascending age order, ties broken towards fewer remaining open
//! instances, and it never names racing candidates. Racing heuristics are
//! policy; swap in your own evaluator to enable them without touching the
//! scheduler.

use std::time::Duration;

use crate::genome::{Genome, Instance};
use crate::stats::GenomeStats;

/// Pluggable scoring strategy consulted by tournament managers.
pub trait RunEvaluator<G, I>: Send + Sync + 'static
where
    G: Genome,
    I: Instance,
{
    /// Queue priority for a genome given its current bookkeeping; lower
    /// values dequeue first. Recomputed every time an instance starts for
    /// the genome, so implementations may depend on the remaining open
    /// count.
    fn priority(&self, stats: &GenomeStats<G, I>) -> f64;

    /// Which currently-active genomes can be cancelled by racing, given
    /// the standings after a completed evaluation. `stats` holds the
    /// ledger of every genome in the tournament; `participant_count` is
    /// the tournament's fixed participant total.
    ///
    /// The concrete statistical test is entirely up to the implementation;
    /// returning an empty vector disables racing for this round.
    fn select_racing_candidates(
        &self,
        stats: &[&GenomeStats<G, I>],
        participant_count: usize,
    ) -> Vec<G>;

    /// Produces a total order over the tournament's participants, best
    /// first, once no open or running work remains.
    fn rank(&self, stats: &[&GenomeStats<G, I>]) -> Vec<G>;
}

/// Default evaluator: age-then-remaining-work priorities, runtime-based
/// ranking, no racing.
///
/// Priorities are ascending in genome age, ties broken towards the genome
/// with fewer remaining open instances, so older genomes close to
/// completing their instance set are served first. Assumes instance sets
/// smaller than one million instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRunEvaluator;

/// Weight separating the age component from the open-count tie-breaker.
const AGE_WEIGHT: f64 = 1e6;

impl StandardRunEvaluator {
    fn sort_key<G, I>(stats: &GenomeStats<G, I>) -> (bool, usize, Duration, u64)
    where
        G: Genome,
        I: Instance,
    {
        (
            stats.is_cancelled_by_racing(),
            usize::MAX - stats.finished_results().len(),
            stats.runtime_of_finished_instances(),
            stats.genome().age(),
        )
    }
}

impl<G, I> RunEvaluator<G, I> for StandardRunEvaluator
where
    G: Genome,
    I: Instance,
{
    fn priority(&self, stats: &GenomeStats<G, I>) -> f64 {
        stats.genome().age() as f64 * AGE_WEIGHT + stats.open_instance_count() as f64
    }

    fn select_racing_candidates(
        &self,
        _stats: &[&GenomeStats<G, I>],
        _participant_count: usize,
    ) -> Vec<G> {
        Vec::new()
    }

    fn rank(&self, stats: &[&GenomeStats<G, I>]) -> Vec<G> {
        let mut order: Vec<&&GenomeStats<G, I>> = stats.iter().collect();
        order.sort_by(|a, b| Self::sort_key(a).cmp(&Self::sort_key(b)));
        order.into_iter().map(|entry| entry.genome().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::EvaluationResult;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct TestGenome {
        id: u32,
        age: u64,
    }

    impl Genome for TestGenome {
        fn age(&self) -> u64 {
            self.age
        }
    }

    fn stats(id: u32, age: u64, open: u32) -> GenomeStats<TestGenome, u32> {
        GenomeStats::new(TestGenome { id, age }, 0..open, std::iter::empty())
    }

    #[test]
    fn test_priority_ascends_with_age() {
        let evaluator = StandardRunEvaluator;
        let young = stats(0, 0, 5);
        let old = stats(1, 3, 1);

        assert!(evaluator.priority(&young) < evaluator.priority(&old));
    }

    #[test]
    fn test_priority_favors_fewer_open_instances_at_equal_age() {
        let evaluator = StandardRunEvaluator;
        let mut nearly_done = stats(0, 2, 5);
        let untouched = stats(1, 2, 5);

        // Starting two instances strictly improves the genome's priority.
        nearly_done.try_start_instance().unwrap();
        nearly_done.try_start_instance().unwrap();

        assert!(evaluator.priority(&nearly_done) < evaluator.priority(&untouched));
    }

    #[test]
    fn test_rank_prefers_uncancelled_faster_genomes() {
        let evaluator = StandardRunEvaluator;

        let mut fast = stats(0, 0, 1);
        let instance = fast.try_start_instance().unwrap();
        fast.finish_instance(
            &instance,
            EvaluationResult::finished(Duration::from_millis(10), 1.0),
        );

        let mut slow = stats(1, 0, 1);
        let instance = slow.try_start_instance().unwrap();
        slow.finish_instance(
            &instance,
            EvaluationResult::finished(Duration::from_millis(80), 1.0),
        );

        let mut killed = stats(2, 0, 1);
        killed.update_cancelled_by_racing();

        let ranking = evaluator.rank(&[&killed, &slow, &fast]);
        let ids: Vec<u32> = ranking.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_standard_evaluator_names_no_racing_candidates() {
        let evaluator = StandardRunEvaluator;
        let a = stats(0, 0, 3);
        let b = stats(1, 0, 3);

        let candidates: Vec<TestGenome> = evaluator.select_racing_candidates(&[&a, &b], 2);
        assert!(candidates.is_empty());
    }
}
