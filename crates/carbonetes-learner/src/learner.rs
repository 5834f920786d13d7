//! The policy learner: population search, hill climbing, atomic commit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use carbonetes_core::config::LearnerConfig;
use carbonetes_core::{HistoricalJob, WeightDim, WeightVector, epoch_secs};
use carbonetes_placement::ClusterStateStore;
use carbonetes_placement::scorer::ScoringParams;
use carbonetes_state::{PolicyRecord, StateStore};
use carbonetes_telemetry::CarbonTable;

use crate::error::{LearnerError, LearnerResult};
use crate::population::generate_population;
use crate::simulator::{ReplaySettings, ReplaySimulator, SimMetrics};

/// Summary of a committed learning run.
#[derive(Debug, Clone)]
pub struct LearnOutcome {
    pub weights: WeightVector,
    pub metrics: SimMetrics,
    pub previous: WeightVector,
    pub previous_fitness: f64,
    pub candidates: usize,
    pub history_used: usize,
    pub history_skipped: usize,
    pub hill_climb_sweeps: usize,
}

pub struct PolicyLearner {
    store: StateStore,
    params: ScoringParams,
    config: LearnerConfig,
    carbon: CarbonTable,
}

impl PolicyLearner {
    pub fn new(
        store: StateStore,
        params: ScoringParams,
        config: LearnerConfig,
        carbon: CarbonTable,
    ) -> Self {
        Self {
            store,
            params,
            config,
            carbon,
        }
    }

    /// Run one learning pass and commit the winner.
    ///
    /// Fatal errors (no policy, no clusters, empty population) abort the
    /// run before anything is committed.
    pub fn learn(&self) -> LearnerResult<LearnOutcome> {
        let current = self
            .store
            .active_policy()?
            .ok_or(LearnerError::MissingPolicy)?
            .weights;

        let mut rng = match self.config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let population = generate_population(&current, &self.config, &mut rng);
        if population.is_empty() {
            return Err(LearnerError::EmptyPopulation);
        }

        let mut base = self.base_snapshot()?;
        let (jobs, skipped) = self.load_history()?;
        let Some(first_arrival) = jobs.iter().map(HistoricalJob::arrival_at).min() else {
            return Err(LearnerError::NoHistory { skipped });
        };
        base.restamp(first_arrival);

        let history_used = jobs.len();
        let sim = ReplaySimulator::new(
            self.params.clone(),
            base,
            jobs,
            ReplaySettings::from(&self.config),
        );

        let candidates = population.len();
        let epsilon = self.config.local_search_epsilon;
        let local = self.config.local_search;
        let mut ranked: Vec<(WeightVector, SimMetrics)> = population
            .into_par_iter()
            .map(|w| {
                if local {
                    local_search(&sim, w, epsilon)
                } else {
                    let m = sim.simulate(&w);
                    (w, m)
                }
            })
            .collect();
        ranked.sort_by(|a, b| a.1.fitness.total_cmp(&b.1.fitness));

        let previous_fitness = sim.simulate(&current).fitness;
        let (seed_w, seed_m) = ranked.swap_remove(0);
        debug!(
            candidates,
            best = seed_m.fitness,
            current = previous_fitness,
            "population evaluated"
        );

        let (weights, metrics, sweeps) = hill_climb(
            &sim,
            seed_w,
            seed_m,
            self.config.hill_climb_step,
            self.config.max_hill_climb_sweeps,
        );

        self.store.replace_active_policy(&PolicyRecord {
            weights,
            fitness: Some(metrics.fitness),
            committed_at: epoch_secs(),
        })?;

        info!(
            a = weights.a,
            b = weights.b,
            c = weights.c,
            d = weights.d,
            fitness = metrics.fitness,
            previous_fitness,
            history = history_used,
            skipped,
            "committed new active policy"
        );

        Ok(LearnOutcome {
            weights,
            metrics,
            previous: current,
            previous_fitness,
            candidates,
            history_used,
            history_skipped: skipped,
            hill_climb_sweeps: sweeps,
        })
    }

    /// Cluster snapshot the replay starts from: the last persisted state,
    /// reconciled with the registry.
    fn base_snapshot(&self) -> LearnerResult<ClusterStateStore> {
        let states = self.store.list_cluster_states()?;
        let registry = self.store.list_clusters()?;
        let intensity = |region: &str| self.carbon.intensity(region);

        let mut base = if states.is_empty() {
            ClusterStateStore::from_registry(&registry, intensity, 0)
        } else {
            ClusterStateStore::from_snapshot(states)
        }
        .map_err(|_| LearnerError::EmptyRegistry)?;

        if !registry.is_empty() {
            base.rebase(&registry, intensity, 0)
                .map_err(|_| LearnerError::EmptyRegistry)?;
        }
        Ok(base)
    }

    /// Valid records from the tail of the log, plus how many were skipped.
    fn load_history(&self) -> LearnerResult<(Vec<HistoricalJob>, usize)> {
        let batch = self.store.recent_history(self.config.history_limit)?;
        let mut skipped = batch.malformed.len();
        let mut jobs = Vec::with_capacity(batch.records.len());
        for job in batch.records {
            match job.validate() {
                Ok(()) => jobs.push(job),
                Err(reason) => {
                    warn!(task = %job.task_id, %reason, "skipping invalid history record");
                    skipped += 1;
                }
            }
        }
        Ok((jobs, skipped))
    }

    /// Periodic loop: learn every `interval_secs` or after
    /// `trigger_after_jobs` new history rows, whichever comes first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let check = Duration::from_secs(self.config.check_interval_secs.max(1));
        let start_count = self.store.history_count().unwrap_or(0);
        let mut trigger = LearnTrigger::new(
            Duration::from_secs(self.config.interval_secs),
            self.config.trigger_after_jobs,
            Instant::now(),
            start_count,
        );

        info!(
            interval_secs = self.config.interval_secs,
            after_jobs = self.config.trigger_after_jobs,
            "policy learner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(check) => {
                    let count = match self.store.history_count() {
                        Ok(count) => count,
                        Err(e) => {
                            warn!(error = %e, "failed to count history");
                            continue;
                        }
                    };
                    if !trigger.due(Instant::now(), count) {
                        continue;
                    }
                    trigger.mark(Instant::now(), count);

                    let learner = self.clone();
                    match tokio::task::spawn_blocking(move || learner.learn()).await {
                        Ok(Ok(outcome)) => {
                            debug!(sweeps = outcome.hill_climb_sweeps, "learning run finished");
                        }
                        Ok(Err(e @ LearnerError::NoHistory { .. })) => {
                            debug!(error = %e, "nothing to learn from");
                        }
                        Ok(Err(e)) if e.kind().is_fatal() => {
                            error!(error = %e, "learning run aborted");
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "learning run failed");
                        }
                        Err(e) => {
                            error!(error = %e, "learning task panicked");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("policy learner shutting down");
                    break;
                }
            }
        }
    }
}

/// Try `±epsilon` on each component in turn, keeping strict improvements.
pub fn local_search(
    sim: &ReplaySimulator,
    start: WeightVector,
    epsilon: f64,
) -> (WeightVector, SimMetrics) {
    let mut best_w = start;
    let mut best = sim.simulate(&start);
    if epsilon <= 0.0 {
        return (best_w, best);
    }
    for dim in WeightDim::ALL {
        for delta in [epsilon, -epsilon] {
            let candidate = best_w.nudged(dim, delta);
            if candidate == best_w {
                continue;
            }
            let m = sim.simulate(&candidate);
            if m.fitness < best.fitness {
                best_w = candidate;
                best = m;
            }
        }
    }
    (best_w, best)
}

/// Sweep `±step` over every dimension until a full sweep finds nothing
/// better or `max_sweeps` is reached. Returns the sweeps performed.
pub fn hill_climb(
    sim: &ReplaySimulator,
    start: WeightVector,
    start_metrics: SimMetrics,
    step: f64,
    max_sweeps: usize,
) -> (WeightVector, SimMetrics, usize) {
    let mut best_w = start;
    let mut best = start_metrics;
    if step <= 0.0 {
        return (best_w, best, 0);
    }

    let mut sweeps = 0;
    while sweeps < max_sweeps {
        sweeps += 1;
        let mut improved = false;
        for dim in WeightDim::ALL {
            for delta in [step, -step] {
                let candidate = best_w.nudged(dim, delta);
                if candidate == best_w {
                    continue;
                }
                let m = sim.simulate(&candidate);
                if m.fitness < best.fitness {
                    best_w = candidate;
                    best = m;
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
    (best_w, best, sweeps)
}

/// Decides when the periodic loop should learn.
#[derive(Debug, Clone)]
pub struct LearnTrigger {
    interval: Duration,
    after_jobs: usize,
    last_run: Instant,
    last_count: usize,
}

impl LearnTrigger {
    pub fn new(interval: Duration, after_jobs: usize, now: Instant, count: usize) -> Self {
        Self {
            interval,
            after_jobs,
            last_run: now,
            last_count: count,
        }
    }

    pub fn due(&self, now: Instant, count: usize) -> bool {
        let elapsed = now.saturating_duration_since(self.last_run) >= self.interval;
        let enough_jobs =
            self.after_jobs > 0 && count.saturating_sub(self.last_count) >= self.after_jobs;
        elapsed || enough_jobs
    }

    pub fn mark(&mut self, now: Instant, count: usize) {
        self.last_run = now;
        self.last_count = count;
    }
}
