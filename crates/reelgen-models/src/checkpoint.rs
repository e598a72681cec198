//! Durable per-job resume state.
//!
//! A checkpoint records which stages of a job have completed and which one
//! failed most recently. `completed_steps` is monotonic: once a stage is
//! marked complete it is never reset for that job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{JobId, Stage};

/// Completion flag per stage, keyed in stage order.
pub type CompletedSteps = BTreeMap<Stage, bool>;

/// Resume point computed from a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum NextStage {
    /// Execution resumes at this stage.
    Run(Stage),
    /// Every stage has completed.
    Complete,
}

impl NextStage {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            NextStage::Run(stage) => Some(*stage),
            NextStage::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, NextStage::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub job_id: JobId,
    pub owner_id: String,
    pub completed_steps: CompletedSteps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_step: Option<Stage>,
    /// Informational only; never consulted when deciding what to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_step: Option<Stage>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint with every stage pending.
    pub fn new(job_id: JobId, owner_id: impl Into<String>) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            completed_steps: Self::pending_steps(),
            last_completed_step: None,
            last_failed_step: None,
            updated_at: Utc::now(),
        }
    }

    /// A completion map with every stage set to `false`.
    pub fn pending_steps() -> CompletedSteps {
        Stage::ALL.iter().map(|stage| (*stage, false)).collect()
    }

    /// A completion map with every stage set to `true`.
    pub fn finished_steps() -> CompletedSteps {
        Stage::ALL.iter().map(|stage| (*stage, true)).collect()
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed_steps.get(&stage).copied().unwrap_or(false)
    }

    /// Mark a stage complete. Calling this twice only refreshes `updated_at`.
    pub fn mark_completed(&mut self, stage: Stage) {
        self.completed_steps.insert(stage, true);
        self.last_completed_step = Some(stage);
        self.updated_at = Utc::now();
    }

    /// Record a failure at `stage`. Completion flags are untouched.
    pub fn mark_failed(&mut self, stage: Stage) {
        self.last_failed_step = Some(stage);
        self.updated_at = Utc::now();
    }

    /// Completion map with any stage missing from the stored record filled in
    /// as pending.
    pub fn steps(&self) -> CompletedSteps {
        Stage::ALL
            .iter()
            .map(|stage| (*stage, self.is_completed(*stage)))
            .collect()
    }

    pub fn next_stage(&self) -> NextStage {
        next_stage(Some(self))
    }
}

/// First stage (in fixed order) not yet completed.
///
/// An absent checkpoint behaves exactly like one with every stage pending.
pub fn next_stage(checkpoint: Option<&Checkpoint>) -> NextStage {
    Stage::ALL
        .iter()
        .copied()
        .find(|stage| !checkpoint.is_some_and(|cp| cp.is_completed(*stage)))
        .map(NextStage::Run)
        .unwrap_or(NextStage::Complete)
}
