//! # Mini Tournaments
//!
//! A mini tournament is a fixed set of competing genomes evaluated against
//! a shared instance set. The [`MiniTournamentManager`] owns the
//! per-genome bookkeeping for one tournament, keeps the shared priority
//! queue synchronized with the remaining work, and applies racing
//! cancellations.
//!
//! The manager provides the racing *mechanism* only: remove from queue,
//! mark instances cancelled, stop issuing new work. Which genomes are
//! statistically dominated enough to kill early is decided by the injected
//! [`RunEvaluator`], so racing heuristics can be swapped without touching
//! the scheduling code.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::evaluation::EvaluationResult;
use crate::evaluator::RunEvaluator;
use crate::genome::{Genome, GenomeInstancePair, GenomeTournamentKey, Instance, TournamentId};
use crate::queue::IndexedPriorityQueue;
use crate::stats::GenomeStats;

/// Definition of one mini tournament within a batch.
#[derive(Clone, Debug)]
pub struct MiniTournament<G, I> {
    /// Identifier of this tournament.
    pub id: TournamentId,
    /// Competing genomes, in the order supplied by the optimization loop.
    pub participants: Vec<G>,
    /// Instance set shared by all participants.
    pub instances: Vec<I>,
}

/// Outcome of a finished mini tournament.
#[derive(Clone, Debug)]
pub struct MiniTournamentResult<G, I> {
    /// The tournament this result belongs to.
    pub id: TournamentId,
    /// Total order over the participants, best first.
    pub ranking: Vec<G>,
    /// The tournament's winner, promoted to the next generation.
    pub winner: G,
    /// The winner's cached results, keyed by instance.
    pub winner_results: HashMap<I, EvaluationResult>,
}

/// Outcome of routing one completed evaluation into the bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultUpdate<G> {
    /// The result was booked; the listed genomes were newly cancelled by
    /// racing and their in-flight evaluations should be cancelled too.
    Applied {
        /// Genomes killed by the racing pass triggered by this result.
        cancelled_genomes: Vec<G>,
    },
    /// The instance was not running for this genome, a duplicate or late
    /// completion. The result must be discarded.
    Stale,
}

/// Owns the bookkeeping of one tournament and its slice of the shared
/// priority queue.
pub struct MiniTournamentManager<G, I, E>
where
    G: Genome,
    I: Instance,
    E: RunEvaluator<G, I>,
{
    id: TournamentId,
    participants: Vec<G>,
    stats: HashMap<G, GenomeStats<G, I>>,
    evaluator: Arc<E>,
    racing_enabled: bool,
}

impl<G, I, E> MiniTournamentManager<G, I, E>
where
    G: Genome,
    I: Instance,
    E: RunEvaluator<G, I>,
{
    /// Creates the manager for one tournament.
    ///
    /// Duplicate genome values in the participant list collapse into a
    /// single entry: a genome never appears twice within one tournament.
    /// Instance bookkeeping starts empty; work is seeded through
    /// [`MiniTournamentManager::requeue_evaluation_if_relevant`].
    pub fn new(tournament: MiniTournament<G, I>, evaluator: Arc<E>, racing_enabled: bool) -> Self {
        let mut participants: Vec<G> = Vec::with_capacity(tournament.participants.len());
        let mut stats = HashMap::new();
        for genome in tournament.participants {
            if stats.contains_key(&genome) {
                warn!(
                    tournament = %tournament.id,
                    genome = ?genome,
                    "duplicate participant collapsed"
                );
                continue;
            }
            stats.insert(
                genome.clone(),
                GenomeStats::new(genome.clone(), std::iter::empty(), std::iter::empty()),
            );
            participants.push(genome);
        }
        Self {
            id: tournament.id,
            participants,
            stats,
            evaluator,
            racing_enabled,
        }
    }

    /// This tournament's identifier.
    pub fn id(&self) -> TournamentId {
        self.id
    }

    /// The distinct participants in their original order.
    pub fn participants(&self) -> &[G] {
        &self.participants
    }

    /// Read access to one genome's ledger.
    pub fn genome_stats(&self, genome: &G) -> Option<&GenomeStats<G, I>> {
        self.stats.get(genome)
    }

    /// Re-adds a pair as open work if its genome belongs to this
    /// tournament and the pair is not already accounted for.
    ///
    /// Used at startup to seed work and on worker-loss recovery: a pair
    /// whose instance is currently marked running moves back to open, one
    /// that is untracked becomes open, and anything finished or
    /// racing-cancelled is left alone.
    pub fn requeue_evaluation_if_relevant(&mut self, pair: &GenomeInstancePair<G, I>) -> bool {
        let Some(stats) = self.stats.get_mut(&pair.genome) else {
            return false;
        };
        if stats.is_cancelled_by_racing() {
            return false;
        }
        if stats.requeue_instance(&pair.instance) {
            debug!(tournament = %self.id, genome = ?pair.genome, instance = ?pair.instance,
                "requeued running instance");
            return true;
        }
        stats.open_instance(pair.instance.clone())
    }

    /// Inserts one queue entry per participating genome that still has
    /// open work, with its priority computed from the current stats.
    pub fn start_synchronizing_queue(&self, queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>) {
        for genome in &self.participants {
            let stats = &self.stats[genome];
            if stats.has_open_instances() && !stats.is_cancelled_by_racing() {
                queue.insert(
                    GenomeTournamentKey::new(genome.clone(), self.id),
                    self.evaluator.priority(stats),
                );
            }
        }
    }

    /// The core scheduling primitive: starts one open instance for the
    /// genome and re-synchronizes its queue entry.
    ///
    /// If an instance was obtained, the genome's priority is recomputed
    /// from its now-reduced open count; once no open instance remains, the
    /// genome's entry is removed from the queue entirely. Returns `None`
    /// if the genome has no open instance (the entry is removed in that
    /// case as well).
    pub fn try_get_next_instance_and_update_priority(
        &mut self,
        genome: &G,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) -> Option<GenomeInstancePair<G, I>> {
        let key = GenomeTournamentKey::new(genome.clone(), self.id);
        let Some(stats) = self.stats.get_mut(genome) else {
            queue.remove(&key);
            return None;
        };
        match stats.try_start_instance() {
            Some(instance) => {
                if stats.has_open_instances() {
                    queue.update(&key, self.evaluator.priority(stats));
                } else {
                    queue.remove(&key);
                }
                Some(GenomeInstancePair::new(genome.clone(), instance))
            }
            None => {
                queue.remove(&key);
                None
            }
        }
    }

    /// Books a completed result, then runs the racing pass over the
    /// updated standings.
    ///
    /// Every genome the evaluator names is transitioned to
    /// cancelled-by-racing and removed from the shared queue, immediately
    /// marking its remaining instances as "will not be evaluated". The
    /// caller is responsible for cancelling any in-flight evaluations of
    /// the returned genomes.
    pub fn update_result(
        &mut self,
        pair: &GenomeInstancePair<G, I>,
        result: EvaluationResult,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) -> ResultUpdate<G> {
        let Some(stats) = self.stats.get_mut(&pair.genome) else {
            return ResultUpdate::Stale;
        };
        if !stats.finish_instance(&pair.instance, result) {
            return ResultUpdate::Stale;
        }

        let mut cancelled_genomes = Vec::new();
        if self.racing_enabled {
            let candidates = self
                .evaluator
                .select_racing_candidates(&self.standings(), self.participants.len());
            for genome in candidates {
                let Some(stats) = self.stats.get_mut(&genome) else {
                    warn!(tournament = %self.id, genome = ?genome,
                        "racing candidate is not a participant, ignoring");
                    continue;
                };
                if stats.update_cancelled_by_racing() {
                    queue.remove(&GenomeTournamentKey::new(genome.clone(), self.id));
                    debug!(tournament = %self.id, genome = ?genome, "cancelled by racing");
                    cancelled_genomes.push(genome);
                }
            }
        }
        ResultUpdate::Applied { cancelled_genomes }
    }

    /// Books a cache hit as if it had just been evaluated, without
    /// touching the worker pool. Runs the same racing pass as a live
    /// completion.
    pub fn apply_cached_result(
        &mut self,
        pair: &GenomeInstancePair<G, I>,
        result: EvaluationResult,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) -> ResultUpdate<G> {
        let Some(stats) = self.stats.get_mut(&pair.genome) else {
            return ResultUpdate::Stale;
        };
        if stats.is_cancelled_by_racing() {
            return ResultUpdate::Stale;
        }
        if !stats.open_instance(pair.instance.clone()) {
            return ResultUpdate::Stale;
        }
        stats.start_instance(&pair.instance);
        self.update_result(pair, result, queue)
    }

    /// Re-inserts, re-prioritizes or removes a genome's queue entry to
    /// match its current bookkeeping. Used after worker-loss recovery,
    /// when an entry may have been dropped while the instance was thought
    /// to be running.
    pub fn resync_queue_entry(
        &self,
        genome: &G,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) {
        let key = GenomeTournamentKey::new(genome.clone(), self.id);
        if let Some(stats) = self.stats.get(genome) {
            if stats.has_open_instances() && !stats.is_cancelled_by_racing() {
                let priority = self.evaluator.priority(stats);
                if !queue.update(&key, priority) {
                    queue.insert(key, priority);
                }
                return;
            }
        }
        queue.remove(&key);
    }

    /// Whether no participant has open or running instances left.
    pub fn is_tournament_finished(&self) -> bool {
        self.stats
            .values()
            .all(|stats| !stats.has_open_or_running_instances())
    }

    /// The participants' ledgers in their original order.
    pub fn standings(&self) -> Vec<&GenomeStats<G, I>> {
        self.participants
            .iter()
            .map(|genome| &self.stats[genome])
            .collect()
    }

    /// Total order over the participants, best first, as decided by the
    /// run-evaluator.
    pub fn final_ranking(&self) -> Vec<G> {
        self.evaluator.rank(&self.standings())
    }
}
