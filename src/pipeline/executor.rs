use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{Stage, VideoJob};
use crate::Result;

/// Everything a stage may read while producing its artifact
pub struct StageContext<'a> {
    pub job: &'a VideoJob,
    pub workdir: &'a Path,
    pub source: &'a Path,
    inputs: &'a BTreeMap<Stage, PathBuf>,
    stage: Stage,
}

impl<'a> StageContext<'a> {
    pub fn new(
        job: &'a VideoJob,
        stage: Stage,
        workdir: &'a Path,
        source: &'a Path,
        inputs: &'a BTreeMap<Stage, PathBuf>,
    ) -> Self {
        Self {
            job,
            workdir,
            source,
            inputs,
            stage,
        }
    }

    /// Local path of a required upstream artifact
    pub fn input(&self, stage: Stage) -> Result<&Path> {
        self.inputs
            .get(&stage)
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow::anyhow!("{} needs {} but it is not available", self.stage, stage))
    }

    /// Local path of an optional upstream artifact, if it was produced or fetched
    pub fn optional_input(&self, stage: Stage) -> Option<&Path> {
        self.inputs.get(&stage).map(PathBuf::as_path)
    }

    /// Where the stage must write its artifact
    pub fn output_path(&self) -> PathBuf {
        self.workdir.join(self.job.stage_filename(self.stage))
    }

    /// Name of the source file, for metadata
    pub fn source_file(&self) -> &str {
        &self.job.source_file
    }
}

/// Stage-specific metadata stored alongside the artifact
pub type StageMetadata = BTreeMap<String, String>;

/// Produces one stage's artifact from its upstream inputs
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    /// Write the artifact to `ctx.output_path()` and describe it
    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata>;

    /// Side effect run once the artifact is safely persisted
    async fn after_persist(&self, _ctx: &StageContext<'_>, _artifact: &Path) -> Result<()> {
        Ok(())
    }
}

/// Registry mapping each stage to its executor
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Box<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the same stage
    pub fn register(&mut self, executor: Box<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    pub fn with(mut self, executor: Box<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<&dyn StageExecutor> {
        self.executors.get(&stage).map(|boxed| boxed.as_ref())
    }

    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<_> = self.executors.keys().copied().collect();
        stages.sort();
        stages
    }
}
