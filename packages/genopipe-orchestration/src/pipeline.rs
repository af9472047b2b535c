//! Per-unit stage evaluation: the decision ladder that turns one
//! (unit, stage) pair into an execution record, and the per-unit run state
//! that accumulates records into a terminal outcome.

use crate::budget::ResourceBudget;
use crate::error::ExtractionError;
use crate::gate;
use crate::report::{ExecutionRecord, StageStatus, UnitOutcome, UnitReport};
use crate::runner;
use crate::stage::{ExtractPlan, Stage, StageMode, StagePlan};
use crate::unit::Unit;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Read-only settings shared by every stage evaluation in one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub budget: ResourceBudget,
    pub logs_dir: PathBuf,
    pub command_timeout: Duration,
}

impl RunContext {
    /// Per-unit logs carry the whole pipeline; exclusive builds log once
    /// per group.
    pub fn log_path(&self, stage: &dyn Stage, unit: &Unit) -> PathBuf {
        match (stage.mode(), &unit.group) {
            (StageMode::ExclusivePerGroup, Some(group)) => {
                self.logs_dir.join(format!("{group}_{}.log", stage.id()))
            }
            _ => self.logs_dir.join(format!("{}_pipeline.log", unit.name)),
        }
    }
}

/// Result of evaluating one stage for one unit. `halt` stops the unit:
/// no later stage is dispatched for it.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub halt: bool,
    pub duration_ms: u64,
}

impl StageOutcome {
    fn new(status: StageStatus, halt: bool, started: Instant) -> Self {
        Self {
            status,
            halt,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Evaluate one stage for one unit: dependency check, configuration
/// check, idempotency gate, then execution. All failures are folded into
/// the returned status; nothing propagates past this boundary.
pub async fn run_stage(stage: &dyn Stage, unit: &Unit, ctx: &RunContext) -> StageOutcome {
    let started = Instant::now();

    for requirement in stage.requires(unit) {
        if !gate::artifact_present(&requirement.path) {
            warn!(
                unit = %unit.name,
                stage = stage.id(),
                artifact = %requirement.path.display(),
                essential = requirement.essential,
                "missing upstream artifact, skipping stage"
            );
            return StageOutcome::new(
                StageStatus::SkippedMissingDependency {
                    path: requirement.path.display().to_string(),
                },
                requirement.essential,
                started,
            );
        }
    }

    let plan = stage.plan(unit, &ctx.budget);
    if let StagePlan::MissingConfig { reason, fatal } = &plan {
        warn!(unit = %unit.name, stage = stage.id(), %reason, "missing configuration");
        return StageOutcome::new(
            StageStatus::SkippedMissingConfig {
                reason: reason.clone(),
            },
            *fatal,
            started,
        );
    }

    if !gate::should_run(stage, unit) {
        info!(unit = %unit.name, stage = stage.id(), "output already present, skipping");
        return StageOutcome::new(StageStatus::SkippedCached, false, started);
    }

    if let Err(e) = stage.prepare(unit) {
        let reason = format!("cannot prepare output directories: {e}");
        return StageOutcome::new(StageStatus::Failed { reason }, true, started);
    }

    info!(unit = %unit.name, stage = stage.id(), "running stage");
    let status = match plan {
        StagePlan::Command(spec) => {
            let log_path = ctx.log_path(stage, unit);
            match runner::run(&spec, &log_path, ctx.command_timeout).await {
                Ok(()) => StageStatus::Success,
                Err(e) => StageStatus::Failed {
                    reason: e.to_string(),
                },
            }
        }
        StagePlan::Extract(extract) => match run_extraction(&extract) {
            Ok(()) => StageStatus::Success,
            Err(e) => StageStatus::Failed {
                reason: e.to_string(),
            },
        },
        StagePlan::MissingConfig { .. } => unreachable!("handled above"),
    };

    let halt = status.is_failure();
    StageOutcome::new(status, halt, started)
}

/// Materialize the two derived sequence artifacts from a predictor output
/// file. The transform itself is pure; this is the I/O shell around it.
fn run_extraction(plan: &ExtractPlan) -> Result<(), ExtractionError> {
    let text = std::fs::read_to_string(&plan.input).map_err(|e| ExtractionError::Read {
        path: plan.input.clone(),
        source: e,
    })?;

    let extraction = genopipe_extract::extract(&text);

    std::fs::write(&plan.proteins_out, &extraction.proteins).map_err(|e| {
        ExtractionError::Write {
            path: plan.proteins_out.clone(),
            source: e,
        }
    })?;
    std::fs::write(&plan.coding_out, &extraction.coding).map_err(|e| ExtractionError::Write {
        path: plan.coding_out.clone(),
        source: e,
    })?;
    Ok(())
}

/// Accumulating run state for one unit. Records are append-only; the
/// first halting status fixes the terminal outcome.
#[derive(Debug, Clone)]
pub struct UnitRun {
    pub unit: Unit,
    records: Vec<ExecutionRecord>,
    outcome: Option<UnitOutcome>,
}

impl UnitRun {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            records: Vec::new(),
            outcome: None,
        }
    }

    /// A unit whose primary input was never found; no stage will run.
    pub fn skipped_no_input(unit: Unit) -> Self {
        Self {
            unit,
            records: Vec::new(),
            outcome: Some(UnitOutcome::SkippedNoInput),
        }
    }

    /// Still eligible for dispatch.
    pub fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn apply(&mut self, stage_id: &str, outcome: StageOutcome) {
        let status = outcome.status.clone();
        self.records
            .push(ExecutionRecord::new(stage_id, outcome.status, outcome.duration_ms));

        if outcome.halt && self.outcome.is_none() {
            self.outcome = Some(match status {
                StageStatus::Failed { reason } => UnitOutcome::Failed {
                    stage: stage_id.to_string(),
                    reason,
                },
                StageStatus::SkippedMissingConfig { reason } => UnitOutcome::HaltedMissingConfig {
                    stage: stage_id.to_string(),
                    reason,
                },
                StageStatus::SkippedMissingDependency { path } => {
                    UnitOutcome::HaltedMissingDependency {
                        stage: stage_id.to_string(),
                        path,
                    }
                }
                _ => UnitOutcome::Failed {
                    stage: stage_id.to_string(),
                    reason: "halted".to_string(),
                },
            });
        }
    }

    /// Seal the unit: stages never reached are recorded `NotRun`, and a
    /// unit that was never halted is a success.
    pub fn finish(self, stage_ids: &[&str]) -> UnitReport {
        let mut records = self.records;
        for id in stage_ids.iter().skip(records.len()) {
            records.push(ExecutionRecord::new(id, StageStatus::NotRun, 0));
        }
        UnitReport {
            unit: self.unit.name,
            group: self.unit.group,
            records,
            outcome: self.outcome.unwrap_or(UnitOutcome::Success),
        }
    }
}
