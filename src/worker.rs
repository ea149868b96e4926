//! # Evaluation Worker
//!
//! A per-slot state machine that runs one (genome, instance) pair at a
//! time against the target algorithm under a CPU-time budget.
//!
//! States: **Idle** (accepting commands), **Evaluating** (bound to exactly
//! one pair) and **Terminated**. Each evaluation attempt runs on its own
//! thread while the worker waits with a deadline, draining its command
//! channel so availability probes are answered immediately even mid-run.
//!
//! Failure policy: a faulting target invocation is retried in place; the
//! consecutive-failure counter is kept per genome, reset on success and on
//! assignment of a new genome. Exceeding the limit surfaces a fatal
//! [`WorkerEvent::Failed`] to the dispatcher instead of silently dropping
//! the evaluation. A run that exceeds its budget is cancelled
//! cooperatively and reported as a normal `Cancelled` result carrying the
//! budget as its runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::TargetError;
use crate::evaluation::{CancelToken, EvaluationResult, TargetRunner};
use crate::genome::{Genome, GenomeInstancePair, Instance};
use crate::messages::{WorkerCommand, WorkerEvent, WorkerId};

/// Interval at which an evaluating worker re-checks its command channel
/// and cancellation token.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Handle the dispatcher keeps per worker slot.
#[derive(Debug)]
pub struct WorkerHandle<G, I> {
    id: WorkerId,
    commands: Sender<WorkerCommand<G, I>>,
    thread: JoinHandle<()>,
}

impl<G, I> WorkerHandle<G, I> {
    /// The slot index of this worker.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Sends a command to the worker. Returns `false` if the worker's
    /// channel has disconnected, which means the worker thread is gone.
    pub fn send(&self, command: WorkerCommand<G, I>) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Whether the worker thread is still running.
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Asks the worker to terminate and waits for its thread to exit.
    pub fn shutdown(self) {
        let _ = self.commands.send(WorkerCommand::Terminate);
        let _ = self.thread.join();
    }
}

/// Outcome of waiting for one evaluation attempt.
enum AttemptOutcome {
    Completed(std::result::Result<f64, TargetError>),
    Cancelled,
    TimedOut,
    Crashed,
}

/// What the worker loop should do after handling an evaluation.
enum Flow {
    Continue,
    Stop,
}

/// A single worker slot.
pub struct EvaluationWorker<G, I, R>
where
    G: Genome,
    I: Instance,
    R: TargetRunner<G, I>,
{
    id: WorkerId,
    runner: Arc<R>,
    budget_millis: Arc<AtomicU64>,
    max_consecutive_failures: usize,
    commands: Receiver<WorkerCommand<G, I>>,
    events: Sender<WorkerEvent<G, I>>,
}

impl<G, I, R> EvaluationWorker<G, I, R>
where
    G: Genome,
    I: Instance,
    R: TargetRunner<G, I>,
{
    /// Spawns a worker slot on its own thread.
    ///
    /// The worker registers itself by sending [`WorkerEvent::Ready`] once
    /// its thread is up; the dispatcher must not assign work before the
    /// registration arrives.
    pub fn spawn(
        id: WorkerId,
        runner: Arc<R>,
        budget_millis: Arc<AtomicU64>,
        max_consecutive_failures: usize,
        events: Sender<WorkerEvent<G, I>>,
    ) -> WorkerHandle<G, I> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let worker = Self {
            id,
            runner,
            budget_millis,
            max_consecutive_failures,
            commands: command_rx,
            events,
        };
        let thread = thread::spawn(move || worker.run());
        WorkerHandle {
            id,
            commands: command_tx,
            thread,
        }
    }

    fn run(self) {
        if self.events.send(WorkerEvent::Ready { worker: self.id }).is_err() {
            return;
        }

        let mut consecutive_failures = 0usize;
        let mut last_genome: Option<G> = None;

        while let Ok(command) = self.commands.recv() {
            match command {
                WorkerCommand::Poll => {
                    if self.events.send(WorkerEvent::Ready { worker: self.id }).is_err() {
                        break;
                    }
                }
                WorkerCommand::UpdateTimeout(budget) => self.store_budget(budget),
                WorkerCommand::Terminate => break,
                WorkerCommand::Evaluate { pair, token } => {
                    if last_genome.as_ref() != Some(&pair.genome) {
                        consecutive_failures = 0;
                        last_genome = Some(pair.genome.clone());
                    }
                    match self.evaluate(pair, token, &mut consecutive_failures) {
                        Flow::Continue => {}
                        Flow::Stop => break,
                    }
                }
            }
        }
        debug!(worker = self.id, "worker terminated");
    }

    /// Runs one pair to a reportable outcome, retrying faults in place.
    fn evaluate(
        &self,
        pair: GenomeInstancePair<G, I>,
        token: CancelToken,
        consecutive_failures: &mut usize,
    ) -> Flow {
        loop {
            let budget = self.load_budget();
            let started = Instant::now();
            let outcome_rx = self.launch_attempt(&pair, &token);

            let outcome = match self.await_attempt(&outcome_rx, &token, started + budget) {
                Ok(outcome) => outcome,
                Err(flow) => return flow,
            };

            match outcome {
                AttemptOutcome::Completed(Ok(objective)) if !token.is_cancelled() => {
                    *consecutive_failures = 0;
                    let result = EvaluationResult::finished(started.elapsed(), objective);
                    return self.report(WorkerEvent::Finished {
                        worker: self.id,
                        pair,
                        result,
                    });
                }
                AttemptOutcome::Completed(Ok(_))
                | AttemptOutcome::Cancelled
                | AttemptOutcome::TimedOut => {
                    // Budget expiry and external cancellation report the
                    // configured budget, never the observed wall time.
                    token.cancel();
                    return self.report(WorkerEvent::Finished {
                        worker: self.id,
                        pair,
                        result: EvaluationResult::cancelled(budget),
                    });
                }
                AttemptOutcome::Completed(Err(fault)) => {
                    if let Some(flow) =
                        self.handle_fault(&pair, &token, budget, fault, consecutive_failures)
                    {
                        return flow;
                    }
                    // Retry the same pair.
                }
                AttemptOutcome::Crashed => {
                    let fault = TargetError("target runner panicked".to_string());
                    if let Some(flow) =
                        self.handle_fault(&pair, &token, budget, fault, consecutive_failures)
                    {
                        return flow;
                    }
                }
            }
        }
    }

    /// Books one fault against the current genome. Returns the flow to
    /// propagate once the evaluation is over, or `None` to retry the same
    /// pair.
    fn handle_fault(
        &self,
        pair: &GenomeInstancePair<G, I>,
        token: &CancelToken,
        budget: Duration,
        fault: TargetError,
        consecutive_failures: &mut usize,
    ) -> Option<Flow> {
        if token.is_cancelled() {
            // A racing kill landed while the run was faulting; the fault
            // no longer matters.
            return Some(self.report(WorkerEvent::Finished {
                worker: self.id,
                pair: pair.clone(),
                result: EvaluationResult::cancelled(budget),
            }));
        }
        *consecutive_failures += 1;
        warn!(
            worker = self.id,
            genome = ?pair.genome,
            instance = ?pair.instance,
            attempt = *consecutive_failures,
            fault = %fault,
            "target algorithm faulted"
        );
        if *consecutive_failures >= self.max_consecutive_failures {
            let attempts = *consecutive_failures;
            return Some(self.report(WorkerEvent::Failed {
                worker: self.id,
                pair: pair.clone(),
                attempts,
                fault,
            }));
        }
        None
    }

    /// Starts one attempt on a dedicated thread. The thread is never
    /// joined: a runner that ignores its cancellation token must not wedge
    /// the worker slot, so its late outcome is simply discarded when the
    /// channel is dropped.
    fn launch_attempt(
        &self,
        pair: &GenomeInstancePair<G, I>,
        token: &CancelToken,
    ) -> Receiver<std::result::Result<f64, TargetError>> {
        let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(1);
        let runner = Arc::clone(&self.runner);
        let genome = pair.genome.clone();
        let instance = pair.instance.clone();
        let token = token.clone();
        thread::spawn(move || {
            let outcome = runner.run(&genome, &instance, &token);
            let _ = outcome_tx.send(outcome);
        });
        outcome_rx
    }

    /// Waits for the attempt while staying responsive to probes,
    /// timeout updates and termination.
    fn await_attempt(
        &self,
        outcome_rx: &Receiver<std::result::Result<f64, TargetError>>,
        token: &CancelToken,
        deadline: Instant,
    ) -> std::result::Result<AttemptOutcome, Flow> {
        loop {
            if token.is_cancelled() {
                return Ok(AttemptOutcome::Cancelled);
            }
            match self.commands.try_recv() {
                Ok(WorkerCommand::Poll) => {
                    if self.events.send(WorkerEvent::Busy { worker: self.id }).is_err() {
                        token.cancel();
                        return Err(Flow::Stop);
                    }
                }
                Ok(WorkerCommand::UpdateTimeout(budget)) => self.store_budget(budget),
                Ok(WorkerCommand::Terminate) => {
                    token.cancel();
                    return Err(Flow::Stop);
                }
                Ok(WorkerCommand::Evaluate { pair, .. }) => {
                    warn!(
                        worker = self.id,
                        genome = ?pair.genome,
                        "evaluation assigned to busy worker, discarding"
                    );
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    token.cancel();
                    return Err(Flow::Stop);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(AttemptOutcome::TimedOut);
            }
            let slice = COMMAND_POLL_INTERVAL.min(deadline - now);
            match outcome_rx.recv_timeout(slice) {
                Ok(outcome) => return Ok(AttemptOutcome::Completed(outcome)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(AttemptOutcome::Crashed),
            }
        }
    }

    fn report(&self, event: WorkerEvent<G, I>) -> Flow {
        if self.events.send(event).is_ok() {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    fn load_budget(&self) -> Duration {
        Duration::from_millis(self.budget_millis.load(Ordering::SeqCst))
    }

    fn store_budget(&self, budget: Duration) {
        self.budget_millis
            .store(budget.as_millis() as u64, Ordering::SeqCst);
    }
}
