/*
 * genopipe-orchestration - per-unit pipeline orchestration engine
 *
 * Coordinates multi-stage processing of independent units through external
 * command-line tools.
 *
 * Architecture:
 * - Command Runner (child processes, merged output capture, timeouts)
 * - Idempotency Gate (artifact presence checks, skip completed work)
 * - Unit Pipeline (per-unit decision ladder and terminal status)
 * - Orchestrator (breadth-first stage sweeps over a bounded worker pool,
 *   exclusive per-group builds)
 * - Run Report (per-unit, per-stage records and the summary table)
 */

pub mod budget;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;
pub mod stages;
pub mod unit;

pub use budget::ResourceBudget;
pub use error::{ExecutionError, ExtractionError, PipelineError, Result};
pub use orchestrator::Orchestrator;
pub use pipeline::{run_stage, RunContext, StageOutcome, UnitRun};
pub use report::{ExecutionRecord, RunReport, StageStatus, UnitOutcome, UnitReport};
pub use stage::{
    CommandSpec, ExtractPlan, PipelineSpec, Requirement, Stage, StageMode, StagePlan,
};
pub use unit::{distinct_groups, find_primary_input, Unit};
