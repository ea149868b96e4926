use std::hash::{Hash, Hasher};
use std::thread;
use std::time::{Duration, Instant};

use racetune::{
    CancelToken, RunEvaluator, SchedulerConfig, SelectCommand, TargetError, TargetRunner,
    TournamentCoordinator,
};
use racetune::stats::GenomeStats;

#[derive(Clone, Debug)]
struct ParamSet {
    values: Vec<i64>,
    age: u64,
}

impl ParamSet {
    fn new(values: Vec<i64>) -> Self {
        Self { values, age: 0 }
    }
}

impl PartialEq for ParamSet {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for ParamSet {}

impl Hash for ParamSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl racetune::Genome for ParamSet {
    fn age(&self) -> u64 {
        self.age
    }
}

const GOOD: i64 = 1;
const BAD: i64 = 100;

/// The good genome returns instantly; the bad genome's runs block until
/// their token is cancelled (by racing or by budget expiry).
struct ContrastRunner;

impl TargetRunner<ParamSet, u32> for ContrastRunner {
    fn run(
        &self,
        genome: &ParamSet,
        _instance: &u32,
        token: &CancelToken,
    ) -> Result<f64, TargetError> {
        if genome.values[0] == BAD {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            return Ok(f64::from(i32::MAX));
        }
        Ok(genome.values[0] as f64)
    }
}

/// Racing policy: once any genome has a finished result, every genome
/// without one is dominated and gets cancelled. Ranking follows the
/// number of finished results, cancelled genomes last.
struct FirstFinishedWinsEvaluator;

impl RunEvaluator<ParamSet, u32> for FirstFinishedWinsEvaluator {
    fn priority(&self, stats: &GenomeStats<ParamSet, u32>) -> f64 {
        // Serve the good genome first so the race is decided early.
        stats.genome().values[0] as f64
    }

    fn select_racing_candidates(
        &self,
        stats: &[&GenomeStats<ParamSet, u32>],
        _participant_count: usize,
    ) -> Vec<ParamSet> {
        let someone_finished = stats
            .iter()
            .any(|s| s.finished_results().values().any(|r| r.is_finished()));
        if !someone_finished {
            return Vec::new();
        }
        stats
            .iter()
            .filter(|s| {
                !s.is_cancelled_by_racing()
                    && s.has_open_or_running_instances()
                    && !s.finished_results().values().any(|r| r.is_finished())
            })
            .map(|s| s.genome().clone())
            .collect()
    }

    fn rank(&self, stats: &[&GenomeStats<ParamSet, u32>]) -> Vec<ParamSet> {
        let mut order: Vec<_> = stats.to_vec();
        order.sort_by_key(|s| {
            (
                s.is_cancelled_by_racing(),
                usize::MAX - s.finished_results().len(),
            )
        });
        order.into_iter().map(|s| s.genome().clone()).collect()
    }
}

#[test]
fn test_dominated_genome_is_cancelled_in_flight() {
    let config = SchedulerConfig::builder()
        .parallelism(2)
        .tournament_size(2)
        .cpu_budget(Duration::from_secs(60))
        .racing_enabled(true)
        .build();
    let mut coordinator =
        TournamentCoordinator::new(config, FirstFinishedWinsEvaluator, ContrastRunner);

    let good = ParamSet::new(vec![GOOD]);
    let bad = ParamSet::new(vec![BAD]);
    // One instance each: the dispatch pass assigns both pairs to the two
    // workers before any completion is processed, so the bad genome is
    // guaranteed to be in flight when the racing kill lands.
    coordinator.submit(SelectCommand::new(
        vec![good.clone(), bad.clone()],
        (0..1).collect(),
        0,
    ));

    let started = Instant::now();
    let outcomes = coordinator.run_pending().unwrap();

    // The bad genome's in-flight run was cancelled cooperatively; the
    // batch must not wait anywhere near the 60 s budget.
    assert!(started.elapsed() < Duration::from_secs(20));

    let tournament = &outcomes[0].tournaments[0];
    assert_eq!(tournament.winner, good);
    assert_eq!(tournament.ranking, vec![good.clone(), bad.clone()]);
    assert_eq!(tournament.winner_results.len(), 1);

    // Racing kills produce no cached results for the victim.
    let storage = coordinator.storage();
    assert!(storage.genome_results(&bad).is_empty());
    assert_eq!(storage.genome_results(&good).len(), 1);
    assert_eq!(storage.evaluation_statistic().distinct_configuration_count, 1);
}

#[test]
fn test_racing_disabled_lets_dominated_genome_time_out() {
    let budget = Duration::from_millis(100);
    let config = SchedulerConfig::builder()
        .parallelism(2)
        .tournament_size(2)
        .cpu_budget(budget)
        .racing_enabled(false)
        .build();
    let mut coordinator =
        TournamentCoordinator::new(config, FirstFinishedWinsEvaluator, ContrastRunner);

    let good = ParamSet::new(vec![GOOD]);
    let bad = ParamSet::new(vec![BAD]);
    coordinator.submit(SelectCommand::new(
        vec![good.clone(), bad.clone()],
        (0..2).collect(),
        0,
    ));

    let outcomes = coordinator.run_pending().unwrap();
    let tournament = &outcomes[0].tournaments[0];
    assert_eq!(tournament.winner, good);

    // With racing off, the bad genome runs every instance into its budget
    // and the timeouts are stored as regular cancelled results carrying
    // the budget as runtime.
    let storage = coordinator.storage();
    let bad_results = storage.genome_results(&bad);
    assert_eq!(bad_results.len(), 2);
    for result in bad_results.values() {
        assert!(result.is_cancelled());
        assert_eq!(result.runtime(), budget);
    }
}
