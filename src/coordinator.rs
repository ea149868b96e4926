//! # Tournament Coordinator
//!
//! Dispatches multiple mini tournaments concurrently against one global
//! worker pool, routing evaluation requests and results between the
//! shared priority queue, the workers and the result storage.
//!
//! All shared mutable state (the priority queue and every tournament's
//! bookkeeping) lives on the coordinator's own thread and is mutated only
//! there; workers communicate exclusively through messages. This keeps the
//! single-writer invariant without any locks around scheduling state. The
//! result storage is the one exception: it is shared through an `Arc` and
//! resolves concurrent writes by first-writer-wins on its own.
//!
//! Select commands are stashed in a FIFO and only dispatched once the
//! configured minimum number of workers has registered; buffered commands
//! then drain in submission order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, TuningError};
use crate::evaluation::{CancelToken, EvaluationResult, TargetRunner};
use crate::evaluator::RunEvaluator;
use crate::genome::{Genome, GenomeInstancePair, GenomeTournamentKey, Instance, TournamentId};
use crate::messages::{
    chunk_genome_results, GenomeResultsMessage, SelectCommand, WorkerCommand, WorkerEvent, WorkerId,
};
use crate::queue::IndexedPriorityQueue;
use crate::storage::ResultStorage;
use crate::tournament::{
    MiniTournament, MiniTournamentManager, MiniTournamentResult, ResultUpdate,
};
use crate::worker::{EvaluationWorker, WorkerHandle};

/// How long the event loop waits for a worker event before running its
/// liveness checks.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long workers get to register before startup is abandoned.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one drained select command.
#[derive(Clone, Debug)]
pub struct GenerationOutcome<G, I> {
    /// Generation counter the command was tagged with.
    pub generation: u64,
    /// One result per mini tournament, in tournament-id order.
    pub tournaments: Vec<MiniTournamentResult<G, I>>,
    /// Cross-tournament total order over every participant, best first.
    pub overall_ranking: Vec<G>,
}

struct Assignment<G, I> {
    tournament: TournamentId,
    pair: GenomeInstancePair<G, I>,
    token: CancelToken,
}

struct WorkerSlot<G, I> {
    handle: WorkerHandle<G, I>,
    assignment: Option<Assignment<G, I>>,
}

/// Owns the worker pool and drives tournament batches to completion.
pub struct TournamentCoordinator<G, I, E, R>
where
    G: Genome,
    I: Instance,
    E: RunEvaluator<G, I>,
    R: TargetRunner<G, I>,
{
    config: SchedulerConfig,
    evaluator: Arc<E>,
    runner: Arc<R>,
    storage: Arc<ResultStorage<G, I>>,
    budget_millis: Arc<AtomicU64>,
    pending: VecDeque<SelectCommand<G, I>>,
}

impl<G, I, E, R> TournamentCoordinator<G, I, E, R>
where
    G: Genome,
    I: Instance,
    E: RunEvaluator<G, I>,
    R: TargetRunner<G, I>,
{
    /// Creates a coordinator with a fresh result storage.
    pub fn new(config: SchedulerConfig, evaluator: E, runner: R) -> Self {
        Self::with_storage(config, evaluator, runner, Arc::new(ResultStorage::new()))
    }

    /// Creates a coordinator sharing an existing result storage, so
    /// evaluations cached by earlier generations are reused.
    pub fn with_storage(
        config: SchedulerConfig,
        evaluator: E,
        runner: R,
        storage: Arc<ResultStorage<G, I>>,
    ) -> Self {
        let budget_millis = Arc::new(AtomicU64::new(config.cpu_budget().as_millis() as u64));
        Self {
            config,
            evaluator: Arc::new(evaluator),
            runner: Arc::new(runner),
            storage,
            budget_millis,
            pending: VecDeque::new(),
        }
    }

    /// The shared result storage.
    pub fn storage(&self) -> Arc<ResultStorage<G, I>> {
        Arc::clone(&self.storage)
    }

    /// Adjusts the CPU-time budget ceiling. Evaluations dispatched after
    /// the change (including retries of in-flight pairs) observe the new
    /// budget.
    pub fn update_timeout(&self, budget: Duration) {
        self.budget_millis
            .store(budget.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stashes a select command for the next [`run_pending`] call.
    ///
    /// [`run_pending`]: TournamentCoordinator::run_pending
    pub fn submit(&mut self, command: SelectCommand<G, I>) {
        self.pending.push_back(command);
    }

    /// Streams one genome's cached results as chunk messages plus a
    /// terminator over the given channel.
    pub fn publish_genome_results(
        &self,
        genome: &G,
        sender: &Sender<GenomeResultsMessage<G, I>>,
    ) -> Result<()> {
        let results: Vec<(I, EvaluationResult)> =
            self.storage.genome_results(genome).into_iter().collect();
        for message in chunk_genome_results(genome, results, self.config.chunk_size()) {
            sender
                .send(message)
                .map_err(|_| TuningError::Disconnected("result receiver dropped".to_string()))?;
        }
        Ok(())
    }

    /// Spawns the worker pool, waits for the minimum number of workers to
    /// register, then drains all stashed commands in submission order.
    ///
    /// The pool is shut down before returning, even on error; every
    /// in-flight evaluation is cancelled cooperatively.
    pub fn run_pending(&mut self) -> Result<Vec<GenerationOutcome<G, I>>> {
        self.config.validate()?;
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let mut pool: Vec<WorkerSlot<G, I>> = (0..self.config.parallelism())
            .map(|id| WorkerSlot {
                handle: EvaluationWorker::spawn(
                    id,
                    Arc::clone(&self.runner),
                    Arc::clone(&self.budget_millis),
                    self.config.max_consecutive_failures(),
                    event_tx.clone(),
                ),
                assignment: None,
            })
            .collect();
        drop(event_tx);

        let mut idle: VecDeque<WorkerId> = VecDeque::new();
        let result = self.drain_commands(&mut pool, &event_rx, &mut idle);

        for slot in pool {
            if let Some(assignment) = &slot.assignment {
                assignment.token.cancel();
            }
            slot.handle.shutdown();
        }
        result
    }

    fn drain_commands(
        &mut self,
        pool: &mut [WorkerSlot<G, I>],
        events: &Receiver<WorkerEvent<G, I>>,
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<Vec<GenerationOutcome<G, I>>> {
        self.await_registrations(pool.len(), events, idle)?;

        let mut outcomes = Vec::with_capacity(self.pending.len());
        while let Some(command) = self.pending.pop_front() {
            outcomes.push(self.run_command(command, pool, events, idle)?);
        }
        Ok(outcomes)
    }

    /// Stash-and-replay gate: commands stay buffered until enough workers
    /// have registered.
    fn await_registrations(
        &self,
        pool_size: usize,
        events: &Receiver<WorkerEvent<G, I>>,
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<()> {
        let needed = self.config.min_ready_workers().max(1).min(pool_size);
        while idle.len() < needed {
            match events.recv_timeout(REGISTRATION_TIMEOUT) {
                Ok(WorkerEvent::Ready { worker }) => {
                    debug!(worker, "worker registered");
                    idle.push_back(worker);
                }
                Ok(event) => {
                    warn!(?event, "unexpected event before registration");
                }
                Err(_) => {
                    return Err(TuningError::Disconnected(format!(
                        "only {} of {} required workers registered",
                        idle.len(),
                        needed
                    )));
                }
            }
        }
        Ok(())
    }

    fn run_command(
        &self,
        command: SelectCommand<G, I>,
        pool: &mut [WorkerSlot<G, I>],
        events: &Receiver<WorkerEvent<G, I>>,
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<GenerationOutcome<G, I>> {
        let generation = command.generation;
        let mut queue = IndexedPriorityQueue::new();
        let mut managers = self.build_managers(command, &mut queue);
        for manager in &managers {
            manager.start_synchronizing_queue(&mut queue);
        }
        info!(
            generation,
            tournaments = managers.len(),
            queued = queue.len(),
            "tournament batch started"
        );

        loop {
            self.dispatch(&mut queue, &mut managers, pool, idle)?;

            let all_finished = managers
                .iter()
                .all(MiniTournamentManager::is_tournament_finished);
            let outstanding = pool.iter().any(|slot| slot.assignment.is_some());
            if all_finished && !outstanding {
                break;
            }

            let event = match events.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    self.recover_lost_workers(pool, &mut managers, &mut queue);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TuningError::Disconnected(
                        "every worker channel closed while work was outstanding".to_string(),
                    ));
                }
            };
            self.handle_event(event, &mut queue, &mut managers, pool, idle)?;
        }

        self.collect_outcome(generation, &managers)
    }

    /// Splits a command's participants into mini tournaments and seeds
    /// their bookkeeping. Pairs with a cached result are booked
    /// immediately and never dispatched again.
    fn build_managers(
        &self,
        command: SelectCommand<G, I>,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) -> Vec<MiniTournamentManager<G, I, E>> {
        let mut managers = Vec::new();
        for (index, chunk) in command
            .participants
            .chunks(self.config.tournament_size())
            .enumerate()
        {
            let tournament = MiniTournament {
                id: TournamentId(index as u64),
                participants: chunk.to_vec(),
                instances: command.instances.clone(),
            };
            let mut manager = MiniTournamentManager::new(
                tournament,
                Arc::clone(&self.evaluator),
                self.config.racing_enabled(),
            );
            for genome in manager.participants().to_vec() {
                for instance in &command.instances {
                    let pair = GenomeInstancePair::new(genome.clone(), instance.clone());
                    if let Some(result) = self.storage.result_for(&genome, instance) {
                        debug!(genome = ?genome, instance = ?instance, "cache hit, skipping dispatch");
                        manager.apply_cached_result(&pair, result, queue);
                    } else {
                        manager.requeue_evaluation_if_relevant(&pair);
                    }
                }
            }
            managers.push(manager);
        }
        managers
    }

    /// Assigns the highest-priority open work to idle workers until one
    /// side runs dry.
    fn dispatch(
        &self,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
        managers: &mut [MiniTournamentManager<G, I, E>],
        pool: &mut [WorkerSlot<G, I>],
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<()> {
        while !idle.is_empty() {
            let Some((key, _)) = queue.peek().map(|(key, priority)| (key.clone(), priority)) else {
                break;
            };
            let manager = managers
                .get_mut(key.tournament.0 as usize)
                .ok_or_else(|| {
                    TuningError::InternalConsistency(format!(
                        "queue entry for unknown {} (genome {:?})",
                        key.tournament, key.genome
                    ))
                })?;
            let Some(pair) =
                manager.try_get_next_instance_and_update_priority(&key.genome, queue)
            else {
                // Stale entry; the call already removed it.
                continue;
            };

            let worker = idle.pop_front().expect("idle worker available");
            let token = CancelToken::new();
            let slot = &mut pool[worker];
            if slot.handle.send(WorkerCommand::Evaluate {
                pair: pair.clone(),
                token: token.clone(),
            }) {
                debug!(worker, genome = ?pair.genome, instance = ?pair.instance, "dispatched");
                slot.assignment = Some(Assignment {
                    tournament: key.tournament,
                    pair,
                    token,
                });
            } else {
                warn!(worker, "worker lost before assignment, requeueing");
                manager.requeue_evaluation_if_relevant(&pair);
                manager.resync_queue_entry(&pair.genome, queue);
            }
        }
        Ok(())
    }

    fn handle_event(
        &self,
        event: WorkerEvent<G, I>,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
        managers: &mut [MiniTournamentManager<G, I, E>],
        pool: &mut [WorkerSlot<G, I>],
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<()> {
        match event {
            WorkerEvent::Ready { worker } => {
                let slot = &mut pool[worker];
                if let Some(assignment) = slot.assignment.take() {
                    // The worker rejoined without reporting its last
                    // assignment; treat the work as lost.
                    warn!(worker, "worker rejoined with abandoned assignment, requeueing");
                    self.requeue_assignment(assignment, managers, queue);
                }
                if !idle.contains(&worker) {
                    idle.push_back(worker);
                }
            }
            WorkerEvent::Busy { worker } => {
                debug!(worker, "worker busy");
            }
            WorkerEvent::Finished {
                worker,
                pair,
                result,
            } => {
                self.handle_completion(worker, pair, result, queue, managers, pool, idle)?;
            }
            WorkerEvent::Failed {
                worker,
                pair,
                attempts,
                fault,
            } => {
                pool[worker].assignment = None;
                return Err(TuningError::EvaluationFailed {
                    genome: format!("{:?}", pair.genome),
                    instance: format!("{:?}", pair.instance),
                    attempts,
                    fault,
                });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_completion(
        &self,
        worker: WorkerId,
        pair: GenomeInstancePair<G, I>,
        result: EvaluationResult,
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
        managers: &mut [MiniTournamentManager<G, I, E>],
        pool: &mut [WorkerSlot<G, I>],
        idle: &mut VecDeque<WorkerId>,
    ) -> Result<()> {
        let slot = &mut pool[worker];
        let Some(assignment) = slot.assignment.take() else {
            // A worker believed lost reported back after its pair was
            // reassigned: discard the late result, offer a fresh poll so
            // the worker rejoins the pool.
            warn!(worker, genome = ?pair.genome, instance = ?pair.instance,
                "late completion from unassigned worker, discarding");
            slot.handle.send(WorkerCommand::Poll);
            return Ok(());
        };
        if assignment.pair != pair {
            warn!(worker, expected = ?assignment.pair.genome, reported = ?pair.genome,
                "completion does not match assignment, discarding");
            self.requeue_assignment(assignment, managers, queue);
            pool[worker].handle.send(WorkerCommand::Poll);
            return Ok(());
        }

        let manager = managers
            .get_mut(assignment.tournament.0 as usize)
            .ok_or_else(|| {
                TuningError::InternalConsistency(format!(
                    "completion for unknown {} (genome {:?})",
                    assignment.tournament, pair.genome
                ))
            })?;
        match manager.update_result(&pair, result.clone(), queue) {
            ResultUpdate::Applied { cancelled_genomes } => {
                self.storage
                    .store(pair.genome.clone(), pair.instance.clone(), result);
                for genome in &cancelled_genomes {
                    Self::cancel_in_flight(assignment.tournament, genome, pool);
                }
            }
            ResultUpdate::Stale => {
                warn!(worker, genome = ?pair.genome, instance = ?pair.instance,
                    "stale completion discarded");
            }
        }
        idle.push_back(worker);
        Ok(())
    }

    /// Requests cooperative cancellation of every in-flight evaluation of
    /// a racing-killed genome.
    fn cancel_in_flight(
        tournament: TournamentId,
        genome: &G,
        pool: &mut [WorkerSlot<G, I>],
    ) {
        for slot in pool.iter() {
            if let Some(assignment) = &slot.assignment {
                if assignment.tournament == tournament && assignment.pair.genome == *genome {
                    debug!(genome = ?genome, "cancelling in-flight evaluation of raced genome");
                    assignment.token.cancel();
                }
            }
        }
    }

    fn requeue_assignment(
        &self,
        assignment: Assignment<G, I>,
        managers: &mut [MiniTournamentManager<G, I, E>],
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) {
        if let Some(manager) = managers.get_mut(assignment.tournament.0 as usize) {
            manager.requeue_evaluation_if_relevant(&assignment.pair);
            manager.resync_queue_entry(&assignment.pair.genome, queue);
        }
    }

    /// Liveness sweep: any dead worker thread with an outstanding
    /// assignment has its pair requeued as open work. No result is
    /// fabricated.
    fn recover_lost_workers(
        &self,
        pool: &mut [WorkerSlot<G, I>],
        managers: &mut [MiniTournamentManager<G, I, E>],
        queue: &mut IndexedPriorityQueue<GenomeTournamentKey<G>>,
    ) {
        for slot in pool.iter_mut() {
            if !slot.handle.is_alive() {
                if let Some(assignment) = slot.assignment.take() {
                    warn!(worker = slot.handle.id(), genome = ?assignment.pair.genome,
                        instance = ?assignment.pair.instance, "worker lost, requeueing evaluation");
                    self.requeue_assignment(assignment, managers, queue);
                }
            }
        }
    }

    fn collect_outcome(
        &self,
        generation: u64,
        managers: &[MiniTournamentManager<G, I, E>],
    ) -> Result<GenerationOutcome<G, I>> {
        let mut tournaments = Vec::with_capacity(managers.len());
        for manager in managers {
            let ranking = manager.final_ranking();
            let Some(winner) = ranking.first().cloned() else {
                continue;
            };
            let winner_results = self.storage.genome_results(&winner);
            tournaments.push(MiniTournamentResult {
                id: manager.id(),
                ranking,
                winner,
                winner_results,
            });
        }

        let all_standings: Vec<_> = managers
            .iter()
            .flat_map(|manager| manager.standings())
            .collect();
        let overall_ranking = self.evaluator.rank(&all_standings);
        info!(
            generation,
            tournaments = tournaments.len(),
            statistic = %self.storage.evaluation_statistic(),
            "tournament batch finished"
        );
        Ok(GenerationOutcome {
            generation,
            tournaments,
            overall_ranking,
        })
    }
}

