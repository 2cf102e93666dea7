//! The iteration loop: propose, execute, score, update.
//!
//! One controller owns a whole campaign. Each iteration walks the phase
//! machine in [`crate::types::Phase`] order:
//!
//! 1. **Preparing**: ask the algorithm for parameter rows, decode them
//!    into batches, append due control batches.
//! 2. **AwaitingCompletion**: bind each batch into the procedure and run
//!    it on the executor.
//! 3. **Scoring**: turn signals into oriented scalar results; controls
//!    turn into drift log entries instead.
//! 4. **Updating**: append records, check the budget and the target
//!    threshold, snapshot everything to the run directory.
//!
//! Failures scoped to one batch (constraint violations, measurement
//! faults, degenerate scores) drop that batch with a warning and the
//! iteration carries on. Anything else aborts the run; the snapshot from
//! the last boundary makes the abort resumable.
//!
//! Cancellation is latched: the flag is only read between iterations, so
//! a cancelled run always leaves a clean, resumable snapshot.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;

use crate::algorithms::{create_algorithm, Algorithm};
use crate::codec::ParamCodec;
use crate::config::OptimizerConfig;
use crate::control::{control_batch_id, ControlLogEntry, ControlScheduler};
use crate::error::{OptimizerError, Result};
use crate::executor::{ExecutionOutcome, Executor};
use crate::procedure::Procedure;
use crate::scoring::score_signal;
use crate::scoring::information::information_score;
use crate::scoring::novelty::{novelty_coefficient, novelty_score};
use crate::signal::peaks::{find_regions, region_areas};
use crate::signal::SignalStore;
use crate::state::OptimizationState;
use crate::types::{Batch, IterationRecord, ObjectiveKind, Phase};

pub const STATE_FILE: &str = "state.json";
pub const HISTORY_FILE: &str = "history.csv";
pub const SIGNAL_DIR: &str = "signals";

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations_run: usize,
    pub reason: String,
    pub best: Option<IterationRecord>,
}

enum BatchSource {
    Searched,
    Control { source_iteration: usize, source_batch: String },
}

struct PlannedBatch {
    batch: Batch,
    source: BatchSource,
}

struct ExecutedBatch {
    batch: Batch,
    source: BatchSource,
    outcome: Option<ExecutionOutcome>,
}

struct ScoredBatch {
    batch: Batch,
    result: Option<f64>,
}

pub struct IterationController {
    config: OptimizerConfig,
    codec: ParamCodec,
    procedure: Procedure,
    algorithm: Box<dyn Algorithm>,
    executor: Box<dyn Executor>,
    store: SignalStore,
    scheduler: ControlScheduler,
    state: OptimizationState,
    out_dir: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl IterationController {
    pub fn new(
        config: OptimizerConfig,
        executor: Box<dyn Executor>,
        out_dir: &Path,
    ) -> Result<Self> {
        let codec = ParamCodec::new(config.parameters.clone(), config.constrained.clone())?;
        let procedure =
            Procedure::from_parts(&config.parameters, &config.constrained, config.analysis_method)?;
        let algorithm = create_algorithm(&config.algorithm)?;
        let store = SignalStore::new(config.detection);
        let scheduler = ControlScheduler::new(config.control, config.algorithm.seed);
        let state = OptimizationState::new(config.digest());

        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("creating run dir {}", out_dir.display()))?;

        Ok(Self {
            config,
            codec,
            procedure,
            algorithm,
            executor,
            store,
            scheduler,
            state,
            out_dir: out_dir.to_path_buf(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Rebuild a controller from the snapshot in `out_dir`. The config must
    /// be the one the snapshot was taken under.
    pub fn resume(
        config: OptimizerConfig,
        executor: Box<dyn Executor>,
        out_dir: &Path,
    ) -> Result<Self> {
        let state = OptimizationState::load(&out_dir.join(STATE_FILE))?;
        if state.config_digest != config.digest() {
            return Err(OptimizerError::config(
                "state file belongs to a different configuration",
            ));
        }
        if let Some(reason) = &state.terminated {
            return Err(OptimizerError::config(format!(
                "run already terminated: {}",
                reason
            )));
        }

        let mut controller = Self::new(config, executor, out_dir)?;
        controller.algorithm.set_calls(state.algorithm_calls);
        controller.scheduler.set_picks(state.control_picks);

        let paths: Vec<PathBuf> =
            state.signal_files.iter().map(|f| out_dir.join(f)).collect();
        controller.store = SignalStore::load(controller.config.detection, &paths)?;
        controller.state = state;
        Ok(controller)
    }

    /// Inject earlier campaign records as algorithm-visible history. They
    /// count for suggestions and control picks but not the budget.
    pub fn seed_history(&mut self, records: Vec<IterationRecord>) {
        self.state.records.extend(records);
    }

    /// Shared flag; set it from another thread to stop at the next
    /// iteration boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    /// Drive iterations until the budget is spent, the target is reached,
    /// or the cancel flag latches.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut iterations_run = 0;
        let reason = loop {
            if let Some(reason) = &self.state.terminated {
                break reason.clone();
            }
            if self.cancel.load(Ordering::Relaxed) {
                self.snapshot()?;
                break "cancelled at iteration boundary, resumable".to_string();
            }
            self.run_iteration()?;
            iterations_run += 1;
        };
        Ok(RunSummary {
            iterations_run,
            reason,
            best: self.state.best().cloned(),
        })
    }

    fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.state.phase.can_advance_to(next) {
            return Err(OptimizerError::Fatal(anyhow::anyhow!(
                "illegal phase change {} -> {}",
                self.state.phase,
                next
            )));
        }
        self.state.phase = next;
        Ok(())
    }

    fn run_iteration(&mut self) -> Result<()> {
        self.advance(Phase::Preparing)?;
        let planned = self.prepare()?;

        let controls = planned
            .iter()
            .filter(|p| matches!(p.source, BatchSource::Control { .. }))
            .count();
        println!(
            "  iteration {:>3}: {} batches, {} control",
            self.state.iteration,
            planned.len() - controls,
            controls
        );

        self.advance(Phase::AwaitingCompletion)?;
        let executed = self.execute_all(planned)?;

        self.advance(Phase::Scoring)?;
        let scored = self.score_all(executed)?;

        self.advance(Phase::Updating)?;
        let done = self.update(scored)?;
        self.advance(if done { Phase::Terminated } else { Phase::Idle })?;
        self.snapshot()?;
        Ok(())
    }

    /// Batches for this iteration: the very first iteration leads with the
    /// nominal recipe, every other slot comes from the algorithm. Control
    /// replays ride along when due.
    fn prepare(&mut self) -> Result<Vec<PlannedBatch>> {
        let iteration = self.state.iteration;
        let mut planned = Vec::new();

        let mut rows_needed = self.config.batch_size;
        let mut next_index = 1;
        if iteration == 1 && self.state.records.is_empty() {
            planned.push(PlannedBatch {
                batch: self.codec.nominal_batch()?,
                source: BatchSource::Searched,
            });
            rows_needed -= 1;
            next_index = 2;
        }

        if rows_needed > 0 {
            let (params, results) = self.codec.matrices(&self.state.records, None)?;
            let bounds = self.codec.bounds();
            let rows = self.algorithm.suggest(
                params.view(),
                results.view(),
                bounds.view(),
                rows_needed,
            )?;
            self.state.algorithm_calls = self.algorithm.calls();

            for decoded in self.codec.decode_rows(rows.view(), next_index) {
                match decoded {
                    Ok(batch) => planned.push(PlannedBatch {
                        batch,
                        source: BatchSource::Searched,
                    }),
                    Err(e) if e.is_batch_local() => {
                        println!("  warning: dropping proposal: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if planned.is_empty() {
            return Err(OptimizerError::Fatal(anyhow::anyhow!(
                "every proposed batch violated a constraint; widen bounds or targets"
            )));
        }

        if self.scheduler.due(iteration) {
            let picks: Vec<(usize, String, Batch)> = self
                .scheduler
                .pick_historical(&self.state.records)
                .into_iter()
                .enumerate()
                .map(|(k, record)| {
                    let mut batch = Batch::new(control_batch_id(iteration, k));
                    batch.values = record.values.clone();
                    (record.iteration, record.batch_id.clone(), batch)
                })
                .collect();
            self.state.control_picks = self.scheduler.picks();
            if picks.is_empty() {
                println!("  warning: control due but no completed history to replay");
            }
            for (source_iteration, source_batch, batch) in picks {
                planned.push(PlannedBatch {
                    batch,
                    source: BatchSource::Control { source_iteration, source_batch },
                });
            }
        }

        Ok(planned)
    }

    fn execute_all(&mut self, planned: Vec<PlannedBatch>) -> Result<Vec<ExecutedBatch>> {
        let mut out = Vec::with_capacity(planned.len());
        for PlannedBatch { batch, source } in planned {
            let bound = self.procedure.bind(&batch)?;
            let outcome = match self.executor.execute(&bound) {
                Ok(outcome) => Some(outcome),
                Err(e) if e.is_batch_local() => {
                    println!("  warning: {}", e);
                    None
                }
                Err(e) => return Err(e),
            };
            out.push(ExecutedBatch { batch, source, outcome });
        }
        Ok(out)
    }

    fn score_all(&mut self, executed: Vec<ExecutedBatch>) -> Result<Vec<ScoredBatch>> {
        let iteration = self.state.iteration;
        let mut scored = Vec::new();

        for ExecutedBatch { batch, source, outcome } in executed {
            match source {
                BatchSource::Searched => {
                    let result = match outcome {
                        None => None,
                        Some(outcome) => {
                            match self.score_searched(iteration, &batch, outcome) {
                                Ok(result) => result,
                                Err(e) if e.is_batch_local() => {
                                    println!("  warning: {}: {}", batch.id, e);
                                    None
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    };
                    scored.push(ScoredBatch { batch, result });
                }
                BatchSource::Control { source_iteration, source_batch } => {
                    if let Some(outcome) = outcome {
                        self.log_control(
                            iteration,
                            &batch,
                            source_iteration,
                            &source_batch,
                            outcome,
                        );
                    }
                }
            }
        }
        Ok(scored)
    }

    /// Oriented result for one searched batch, `None` when the objective
    /// cannot be evaluated on what came back.
    fn score_searched(
        &mut self,
        iteration: usize,
        batch: &Batch,
        outcome: ExecutionOutcome,
    ) -> Result<Option<f64>> {
        if let ObjectiveKind::FinalParameter = self.config.objective.kind {
            let value = outcome.reported.ok_or_else(|| {
                OptimizerError::degenerate("executor reported no final value")
            })?;
            // the signal still joins the corpus so controls can compare
            if let Some(mut signal) = outcome.signals.into_iter().next() {
                signal.iteration = Some(iteration);
                signal.batch_id = Some(batch.id.clone());
                self.store.insert(signal);
            }
            return Ok(Some(self.oriented(value)));
        }

        let mut signal = match outcome.signals.into_iter().next() {
            Some(signal) => signal,
            None => {
                return Err(OptimizerError::degenerate("no signal came back"));
            }
        };
        signal.iteration = Some(iteration);
        signal.batch_id = Some(batch.id.clone());

        if let ObjectiveKind::Novelty = self.config.objective.kind {
            let regions = find_regions(&signal, &self.config.detection);
            let areas = region_areas(&signal, &regions);
            let information = information_score(&regions, &areas)?;

            let index = self.store.insert(signal);
            let current = self.store.point_lists()[index].clone();
            let coefficient = novelty_coefficient(&current, self.store.point_lists())?;
            return Ok(Some(self.oriented(novelty_score(information, coefficient))));
        }

        let score = score_signal(&signal, &self.config.objective, &self.config.detection)?;
        self.store.insert(signal);
        if score.is_nan() {
            println!(
                "  warning: {}: objective unsupported for this signal kind",
                batch.id
            );
            return Ok(None);
        }
        Ok(Some(score))
    }

    fn oriented(&self, value: f64) -> f64 {
        if self.config.objective.minimize {
            -value
        } else {
            value
        }
    }

    /// Compare a control replay against its stored signal. The fresh
    /// signal never joins the store, so the novelty corpus stays clean.
    fn log_control(
        &mut self,
        iteration: usize,
        batch: &Batch,
        source_iteration: usize,
        source_batch: &str,
        outcome: ExecutionOutcome,
    ) {
        let Some(fresh) = outcome.signals.into_iter().next() else {
            println!("  warning: {}: control produced no signal", batch.id);
            return;
        };
        let Some(stored) = self.store.find(source_iteration, source_batch) else {
            println!(
                "  warning: {}: no stored signal for iteration {} {}",
                batch.id, source_iteration, source_batch
            );
            return;
        };
        let difference = fresh.difference_mean(stored);
        println!(
            "  control {}: drift {:+.4} vs iteration {} {}",
            batch.id, difference, source_iteration, source_batch
        );
        self.state.control_log.push(ControlLogEntry {
            iteration,
            source_iteration,
            source_batch: source_batch.to_string(),
            batch_id: batch.id.clone(),
            difference,
        });
    }

    /// Append records, bump the iteration, decide whether the run is over.
    fn update(&mut self, scored: Vec<ScoredBatch>) -> Result<bool> {
        let iteration = self.state.iteration;
        for ScoredBatch { batch, result } in scored {
            let mut record = IterationRecord::from_batch(iteration, &batch);
            record.result = result;
            self.state.records.push(record);
        }
        self.state.iteration += 1;

        if let Some(threshold) = self.config.threshold {
            let reached = self
                .state
                .records
                .iter()
                .filter(|r| r.iteration == iteration)
                .any(|r| r.result.is_some_and(|v| v > threshold));
            if reached {
                let reason = format!("target threshold {} reached", threshold);
                println!("  {}", reason);
                self.state.terminated = Some(reason);
                return Ok(true);
            }
        }
        if self.state.completed() >= self.config.max_iterations {
            let reason =
                format!("iteration budget of {} exhausted", self.config.max_iterations);
            println!("  {}", reason);
            self.state.terminated = Some(reason);
            return Ok(true);
        }
        Ok(false)
    }

    /// Persist signals, state, and the history CSV. Runs at every
    /// iteration boundary so a crash loses at most one iteration.
    fn snapshot(&mut self) -> Result<()> {
        let signal_dir = self.out_dir.join(SIGNAL_DIR);
        let files = self.store.save_all(&signal_dir)?;
        self.state.signal_files = files
            .iter()
            .map(|p| {
                p.strip_prefix(&self.out_dir)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        self.state.save(&self.out_dir.join(STATE_FILE))?;

        let names: Vec<String> =
            self.codec.names().iter().map(|s| s.to_string()).collect();
        self.state.export_csv(
            &names,
            &self.config.objective.column_name(),
            &self.out_dir.join(HISTORY_FILE),
        )?;
        Ok(())
    }
}
