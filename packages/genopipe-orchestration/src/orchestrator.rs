//! Run scheduling: breadth-first by stage, pool-parallel by unit.
//!
//! Each stage is fully drained across all still-active units before the
//! next stage begins. Exclusive stages never enter the pool; they run
//! sequentially in this flow, once per distinct resource group, so units
//! sharing a resource never race to build it.

use crate::error::{PipelineError, Result};
use crate::pipeline::{run_stage, RunContext, UnitRun};
use crate::report::{RunReport, UnitReport};
use crate::stage::{PipelineSpec, Stage, StageMode};
use crate::unit::{distinct_groups, Unit};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Orchestrator {
    spec: PipelineSpec,
    ctx: Arc<RunContext>,
}

impl Orchestrator {
    pub fn new(spec: PipelineSpec, ctx: RunContext) -> Self {
        Self {
            spec,
            ctx: Arc::new(ctx),
        }
    }

    /// Drive every unit through the stage sequence and aggregate the
    /// per-unit outcomes. A single unit's failure never aborts the run;
    /// the only hard errors here are an empty unit set and log-directory
    /// I/O.
    pub async fn run_all(&self, units: Vec<Unit>) -> Result<RunReport> {
        if units.is_empty() {
            return Err(PipelineError::NoUnits);
        }
        if self.spec.stages.is_empty() {
            return Err(PipelineError::config("pipeline has no stages"));
        }
        std::fs::create_dir_all(&self.ctx.logs_dir)?;

        let started_at = Utc::now();
        info!(
            pipeline = self.spec.name,
            units = units.len(),
            pool_size = self.ctx.budget.pool_size,
            cores_per_worker = self.ctx.budget.cores_per_worker,
            "starting run"
        );

        let mut runs: Vec<UnitRun> = units
            .into_iter()
            .map(|unit| {
                if self.spec.requires_input && unit.input.is_none() {
                    warn!(unit = %unit.name, "no primary input found, skipping unit");
                    UnitRun::skipped_no_input(unit)
                } else {
                    UnitRun::new(unit)
                }
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.ctx.budget.pool_size));

        for stage in &self.spec.stages {
            let active: Vec<usize> = runs
                .iter()
                .enumerate()
                .filter(|(_, run)| run.is_active())
                .map(|(idx, _)| idx)
                .collect();
            if active.is_empty() {
                break;
            }
            info!(stage = stage.id(), units = active.len(), "stage sweep");

            match stage.mode() {
                StageMode::ExclusivePerGroup => {
                    self.run_exclusive(Arc::clone(stage), &mut runs).await;
                }
                StageMode::PerUnit => {
                    self.run_sweep(Arc::clone(stage), &active, &mut runs, &semaphore)
                        .await;
                }
            }
        }

        let stage_ids = self.spec.stage_ids();
        let unit_reports: Vec<UnitReport> = runs
            .into_iter()
            .map(|run| run.finish(&stage_ids))
            .collect();

        let report = RunReport {
            id: Uuid::new_v4(),
            pipeline: self.spec.name.to_string(),
            started_at,
            finished_at: Utc::now(),
            budget_warning: self.ctx.budget.warning.clone(),
            units: unit_reports,
        };
        info!(
            succeeded = report.success_count(),
            total = report.units.len(),
            "run complete"
        );
        Ok(report)
    }

    /// One pool sweep: every active unit attempts the stage, bounded by
    /// `pool_size` concurrent workers; the sweep drains fully before
    /// returning.
    async fn run_sweep(
        &self,
        stage: Arc<dyn Stage>,
        active: &[usize],
        runs: &mut [UnitRun],
        semaphore: &Arc<Semaphore>,
    ) {
        let mut tasks = Vec::with_capacity(active.len());
        for &idx in active {
            let stage = Arc::clone(&stage);
            let unit = runs[idx].unit.clone();
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = run_stage(stage.as_ref(), &unit, &ctx).await;
                (idx, outcome)
            }));
        }

        for joined in join_all(tasks).await {
            match joined {
                Ok((idx, outcome)) => runs[idx].apply(stage.id(), outcome),
                Err(e) => error!(stage = stage.id(), "worker task failed: {e}"),
            }
        }
    }

    /// Exclusive stages: one sequential invocation per distinct resource
    /// group (first-appearance order), its outcome recorded onto every
    /// active member. Units without a group run individually, still
    /// sequentially.
    async fn run_exclusive(&self, stage: Arc<dyn Stage>, runs: &mut [UnitRun]) {
        let active_units: Vec<Unit> = runs
            .iter()
            .filter(|run| run.is_active())
            .map(|run| run.unit.clone())
            .collect();

        for group in distinct_groups(&active_units) {
            let representative = active_units
                .iter()
                .find(|unit| unit.group.as_deref() == Some(group.as_str()));
            let Some(representative) = representative else {
                continue;
            };

            info!(stage = stage.id(), group = %group, "exclusive build");
            let outcome = run_stage(stage.as_ref(), representative, &self.ctx).await;

            for run in runs.iter_mut().filter(|run| {
                run.is_active() && run.unit.group.as_deref() == Some(group.as_str())
            }) {
                run.apply(stage.id(), outcome.clone());
            }
        }

        let groupless: Vec<usize> = runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.is_active() && run.unit.group.is_none())
            .map(|(idx, _)| idx)
            .collect();
        for idx in groupless {
            let unit = runs[idx].unit.clone();
            let outcome = run_stage(stage.as_ref(), &unit, &self.ctx).await;
            runs[idx].apply(stage.id(), outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ResourceBudget;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_unit_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            PipelineSpec {
                name: "empty",
                stages: vec![],
                requires_input: false,
            },
            RunContext {
                budget: ResourceBudget::compute(2, 4),
                logs_dir: dir.path().join("logs"),
                command_timeout: Duration::from_secs(5),
            },
        );

        let err = orchestrator.run_all(vec![]).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoUnits));
    }
}
