//! # Message Surface
//!
//! Typed messages exchanged between the coordinator, its workers and the
//! caller. The transport is internal process messaging over
//! `crossbeam-channel`; no wire format is defined here.
//!
//! Large batches of results for one genome are reported in bounded-size
//! chunks followed by exactly one terminator carrying the total expected
//! count, so receivers can detect completeness independent of chunk
//! arrival order.

use std::time::Duration;

use crate::evaluation::EvaluationResult;
use crate::genome::{Genome, GenomeInstancePair, Instance};
use crate::{error::TargetError, evaluation::CancelToken};

/// Index of a worker slot within the pool.
pub type WorkerId = usize;

/// Commands the dispatcher sends to a worker slot.
#[derive(Clone, Debug)]
pub enum WorkerCommand<G, I> {
    /// Availability probe; answered immediately with
    /// [`WorkerEvent::Ready`] while idle or [`WorkerEvent::Busy`] while
    /// evaluating.
    Poll,
    /// Assigns one (genome, instance) evaluation together with its
    /// cancellation handle.
    Evaluate {
        /// The pair to evaluate.
        pair: GenomeInstancePair<G, I>,
        /// Cooperative cancellation handle; the dispatcher keeps a clone.
        token: CancelToken,
    },
    /// Adjusts the CPU-time budget ceiling for subsequent evaluations.
    UpdateTimeout(Duration),
    /// Stops the worker, cancelling any in-flight evaluation.
    Terminate,
}

/// Events a worker reports back to the dispatcher.
#[derive(Clone, Debug)]
pub enum WorkerEvent<G, I> {
    /// The worker is idle and can accept work.
    Ready {
        /// Reporting worker.
        worker: WorkerId,
    },
    /// The worker is evaluating and cannot accept work.
    Busy {
        /// Reporting worker.
        worker: WorkerId,
    },
    /// An evaluation produced a result (finished or cancelled).
    Finished {
        /// Reporting worker.
        worker: WorkerId,
        /// The evaluated pair.
        pair: GenomeInstancePair<G, I>,
        /// The outcome.
        result: EvaluationResult,
    },
    /// The retry budget for an evaluation was exhausted; fatal for the
    /// tournament batch.
    Failed {
        /// Reporting worker.
        worker: WorkerId,
        /// The pair whose evaluation kept faulting.
        pair: GenomeInstancePair<G, I>,
        /// Number of consecutive faulted attempts.
        attempts: usize,
        /// The last fault.
        fault: TargetError,
    },
}

/// Caller command starting one tournament batch.
#[derive(Clone, Debug)]
pub struct SelectCommand<G, I> {
    /// Genomes competing in this batch; split into mini tournaments by the
    /// coordinator.
    pub participants: Vec<G>,
    /// Instance set shared by every tournament of the batch.
    pub instances: Vec<I>,
    /// Generation counter of the optimization loop, for diagnostics.
    pub generation: u64,
}

impl<G, I> SelectCommand<G, I> {
    /// Creates a batch command.
    pub fn new(participants: Vec<G>, instances: Vec<I>, generation: u64) -> Self {
        Self {
            participants,
            instances,
            generation,
        }
    }
}

/// One result inside a chunk, tagged with its contiguous 0-based id
/// within the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentifiedResult<I> {
    /// Position of this result within the full batch.
    pub id: usize,
    /// The evaluated instance.
    pub instance: I,
    /// The result.
    pub result: EvaluationResult,
}

/// Chunked transmission of one genome's result batch.
#[derive(Clone, Debug, PartialEq)]
pub enum GenomeResultsMessage<G, I> {
    /// A bounded-size slice of the batch.
    Chunk {
        /// The genome the results belong to.
        genome: G,
        /// At most `chunk_size` identified results.
        results: Vec<IdentifiedResult<I>>,
    },
    /// Exactly one terminator per batch, carrying the total count the
    /// receiver should expect across all chunks.
    Terminator {
        /// The genome the results belong to.
        genome: G,
        /// Total number of results transmitted in the batch.
        expected_count: usize,
    },
}

/// Splits a batch of freshly produced results for one genome into
/// bounded-size chunk messages plus one terminator.
///
/// For `N` results this yields `ceil(N / chunk_size)` chunk messages and
/// one terminator; zero results still produce exactly one terminator with
/// an expected count of zero. Result ids are contiguous and 0-based in
/// batch order.
pub fn chunk_genome_results<G, I>(
    genome: &G,
    results: Vec<(I, EvaluationResult)>,
    chunk_size: usize,
) -> Vec<GenomeResultsMessage<G, I>>
where
    G: Genome,
    I: Instance,
{
    assert!(chunk_size > 0, "chunk size must be positive");

    let expected_count = results.len();
    let identified: Vec<IdentifiedResult<I>> = results
        .into_iter()
        .enumerate()
        .map(|(id, (instance, result))| IdentifiedResult {
            id,
            instance,
            result,
        })
        .collect();

    let mut messages: Vec<GenomeResultsMessage<G, I>> = identified
        .chunks(chunk_size)
        .map(|chunk| GenomeResultsMessage::Chunk {
            genome: genome.clone(),
            results: chunk.to_vec(),
        })
        .collect();
    messages.push(GenomeResultsMessage::Terminator {
        genome: genome.clone(),
        expected_count,
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct TestGenome(u32);

    impl Genome for TestGenome {
        fn age(&self) -> u64 {
            0
        }
    }

    fn batch(n: usize) -> Vec<(u32, EvaluationResult)> {
        (0..n)
            .map(|i| {
                (
                    i as u32,
                    EvaluationResult::finished(Duration::from_millis(i as u64), i as f64),
                )
            })
            .collect()
    }

    fn chunk_and_split(
        n: usize,
        chunk_size: usize,
    ) -> (Vec<Vec<IdentifiedResult<u32>>>, usize) {
        let messages = chunk_genome_results(&TestGenome(1), batch(n), chunk_size);
        let mut chunks = Vec::new();
        let mut expected = None;
        for message in messages {
            match message {
                GenomeResultsMessage::Chunk { results, .. } => chunks.push(results),
                GenomeResultsMessage::Terminator { expected_count, .. } => {
                    assert!(expected.is_none(), "more than one terminator");
                    expected = Some(expected_count);
                }
            }
        }
        (chunks, expected.expect("terminator missing"))
    }

    #[test]
    fn test_chunk_count_matches_ceiling_division() {
        for (n, chunk_size, expected_chunks) in
            [(0, 50, 0), (1, 50, 1), (50, 50, 1), (51, 50, 2), (125, 50, 3)]
        {
            let (chunks, expected) = chunk_and_split(n, chunk_size);
            assert_eq!(chunks.len(), expected_chunks, "n = {}", n);
            assert_eq!(expected, n);
        }
    }

    #[test]
    fn test_concatenated_chunks_have_contiguous_ids() {
        let (chunks, expected) = chunk_and_split(125, 50);
        let flattened: Vec<IdentifiedResult<u32>> = chunks.into_iter().flatten().collect();

        assert_eq!(flattened.len(), expected);
        for (position, identified) in flattened.iter().enumerate() {
            assert_eq!(identified.id, position);
            assert_eq!(identified.instance, position as u32);
        }
    }

    #[test]
    fn test_empty_batch_is_terminator_only() {
        let messages = chunk_genome_results(&TestGenome(1), batch(0), 50);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            GenomeResultsMessage::Terminator { expected_count, .. } => {
                assert_eq!(*expected_count, 0)
            }
            other => panic!("expected terminator, got {:?}", other),
        }
    }

    #[test]
    fn test_chunks_respect_bound() {
        let (chunks, _) = chunk_and_split(120, 50);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 50));
        assert_eq!(chunks.last().map(Vec::len), Some(20));
    }
}
