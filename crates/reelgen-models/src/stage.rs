//! Pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five ordered units of pipeline work.
///
/// The declaration order is the execution order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Script,
    Images,
    Audio,
    Captions,
    Render,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Script,
        Stage::Images,
        Stage::Audio,
        Stage::Captions,
        Stage::Render,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Images => "images",
            Stage::Audio => "audio",
            Stage::Captions => "captions",
            Stage::Render => "render",
        }
    }

    /// Position in the fixed stage order (0-based).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Stages that must be complete before this one may run.
    pub fn predecessors(&self) -> &'static [Stage] {
        &Stage::ALL[..self.index()]
    }

    /// Human-readable description of the action this stage performs.
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Script => "Writing script",
            Stage::Images => "Generating scene images",
            Stage::Audio => "Synthesizing narration",
            Stage::Captions => "Transcribing captions",
            Stage::Render => "Rendering video",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}
