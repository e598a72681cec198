//! Stage executors and the registry the driver dispatches through.

use std::sync::Arc;

use async_trait::async_trait;

use reelgen_models::{JobId, Stage};

use crate::error::{ConfigError, StageResult};

/// One pipeline stage.
///
/// Executors receive only the job id. They read their inputs from the job's
/// durable record and write their outputs there before returning `Ok`.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, job_id: &JobId) -> StageResult<()>;
}

/// Exactly one executor per stage, indexed in pipeline order.
pub struct StageRegistry {
    executors: Vec<Arc<dyn StageExecutor>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.executors.iter().map(|e| e.stage()).collect::<Vec<_>>())
            .finish()
    }
}

impl StageRegistry {
    /// Build from a set of executors. Every stage must be covered exactly once.
    pub fn new(
        executors: impl IntoIterator<Item = Arc<dyn StageExecutor>>,
    ) -> Result<Self, ConfigError> {
        let mut slots: Vec<Option<Arc<dyn StageExecutor>>> = vec![None; Stage::ALL.len()];

        for executor in executors {
            let stage = executor.stage();
            let slot = &mut slots[stage.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateStage(stage));
            }
            *slot = Some(executor);
        }

        let executors = Stage::ALL
            .iter()
            .zip(slots)
            .map(|(stage, slot)| slot.ok_or(ConfigError::MissingStage(*stage)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { executors })
    }

    pub fn get(&self, stage: Stage) -> &dyn StageExecutor {
        self.executors[stage.index()].as_ref()
    }
}
