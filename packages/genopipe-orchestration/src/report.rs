use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one (unit, stage) pair. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// Output artifact already present; nothing executed.
    SkippedCached,
    /// No stage-specific configuration for this unit.
    SkippedMissingConfig { reason: String },
    /// A predecessor artifact was absent or empty.
    SkippedMissingDependency { path: String },
    Failed { reason: String },
    /// The unit halted at an earlier stage.
    NotRun,
}

impl StageStatus {
    /// Fixed-width label for the summary table.
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Success => "Success",
            StageStatus::SkippedCached => "Cached",
            StageStatus::SkippedMissingConfig { .. } => "NoConfig",
            StageStatus::SkippedMissingDependency { .. } => "NoDep",
            StageStatus::Failed { .. } => "FAILED",
            StageStatus::NotRun => "NotRun",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed { .. })
    }
}

/// One appended record; the full report is the ordered collection of these
/// grouped by unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub stage: String,
    pub status: StageStatus,
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn new(stage: &str, status: StageStatus, duration_ms: u64) -> Self {
        Self {
            stage: stage.to_string(),
            status,
            recorded_at: Utc::now(),
            duration_ms,
        }
    }
}

/// Terminal state of one unit's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Every applicable stage completed or was validly skipped.
    Success,
    Failed { stage: String, reason: String },
    /// No primary input artifact was found for the unit.
    SkippedNoInput,
    /// A stage fatal to all downstream work lacked configuration.
    HaltedMissingConfig { stage: String, reason: String },
    /// An essential upstream artifact never appeared.
    HaltedMissingDependency { stage: String, path: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success)
    }

    pub fn describe(&self) -> String {
        match self {
            UnitOutcome::Success => "success".into(),
            UnitOutcome::Failed { stage, reason } => {
                format!("failed at {stage}: {}", first_line(reason))
            }
            UnitOutcome::SkippedNoInput => "skipped: no input file".into(),
            UnitOutcome::HaltedMissingConfig { stage, reason } => {
                format!("halted at {stage}: {}", first_line(reason))
            }
            UnitOutcome::HaltedMissingDependency { stage, path } => {
                format!("halted at {stage}: missing {path}")
            }
        }
    }
}

/// Stage-by-stage statuses and the terminal outcome for one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: String,
    pub group: Option<String>,
    pub records: Vec<ExecutionRecord>,
    pub outcome: UnitOutcome,
}

/// Aggregated result of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub budget_warning: Option<String>,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_success()).count()
    }

    pub fn non_success_count(&self) -> usize {
        self.units.len() - self.success_count()
    }

    pub fn has_non_success(&self) -> bool {
        self.non_success_count() > 0
    }

    /// Condensed human-readable summary: one row per unit with the status
    /// of every stage, followed by truncated failure details.
    pub fn render(&self, stage_ids: &[&str]) -> String {
        let mut out = String::new();
        let sep = "-".repeat(14 + 11 * stage_ids.len());

        out.push_str(&format!("Pipeline summary: {}\n", self.pipeline));
        if let Some(warning) = &self.budget_warning {
            out.push_str(&format!("[WARNING] {warning}\n"));
        }

        out.push_str(&format!("{:<13}", "unit"));
        for id in stage_ids {
            out.push_str(&format!(" {:<10}", truncate(id, 10)));
        }
        out.push('\n');
        out.push_str(&sep);
        out.push('\n');

        for unit in &self.units {
            out.push_str(&format!("{:<13}", truncate(&unit.unit, 13)));
            for id in stage_ids {
                let label = unit
                    .records
                    .iter()
                    .find(|r| r.stage == *id)
                    .map(|r| r.status.label())
                    .unwrap_or("NotRun");
                out.push_str(&format!(" {:<10}", label));
            }
            out.push('\n');
        }
        out.push_str(&sep);
        out.push('\n');

        out.push_str(&format!(
            "{} / {} units succeeded\n",
            self.success_count(),
            self.units.len()
        ));

        for unit in self.units.iter().filter(|u| !u.outcome.is_success()) {
            out.push_str(&format!(
                "  {}: {}\n",
                unit.unit,
                truncate(&unit.outcome.describe(), 100)
            ));
        }

        out
    }
}

/// First line of a possibly multi-line reason.
fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
