use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::time::timeout;

use super::executor::{ExecutorRegistry, StageContext};
use super::{Dependency, ExistenceSnapshot, Stage, StagePlan, VideoJob};
use crate::config::Config;
use crate::storage::{ArtifactStore, ObjectMetadata};
use crate::utils::format_duration;
use crate::{PipelineError, Result};

/// Knobs the orchestrator reads from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Extension the source file must carry, without the dot
    pub source_extension: String,

    /// Deadline for one stage, including its post-persist step
    pub stage_timeout: Duration,

    /// Parent directory for per-job working areas
    pub temp_dir: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            source_extension: "mp4".to_string(),
            stage_timeout: Duration::from_secs(3600),
            temp_dir: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_extension: config.pipeline.source_extension.clone(),
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            temp_dir: config.app.temp_dir.clone(),
        }
    }
}

/// What one run did for a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub video_id: String,
    /// Stages whose production function ran and whose output was stored
    pub executed: Vec<Stage>,
    /// Satisfied stages fetched from the store because a pending stage reads them
    pub fetched: Vec<Stage>,
    /// Satisfied stages left untouched
    pub skipped: Vec<Stage>,
}

impl JobReport {
    fn new(job: &VideoJob) -> Self {
        Self {
            video_id: job.video_id.clone(),
            ..Self::default()
        }
    }
}

/// Anything that can process a single job; the batch runner drives this
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &VideoJob, force: bool) -> Result<JobReport>;
}

/// Runs the unsatisfied stages of a job in dependency order.
///
/// The artifact store is the only checkpoint: each output is persisted as soon as it is
/// produced, so a failed run is resumed by simply running the job again.
pub struct PipelineOrchestrator {
    store: Arc<dyn ArtifactStore>,
    executors: ExecutorRegistry,
    plan: StagePlan,
    settings: OrchestratorSettings,
}

impl PipelineOrchestrator {
    pub fn new(store: Arc<dyn ArtifactStore>, executors: ExecutorRegistry, plan: StagePlan) -> Self {
        Self {
            store,
            executors,
            plan,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Process one job, reporting success as a plain flag
    pub async fn process_video(&self, job: &VideoJob, force: bool) -> bool {
        match self.run(job, force).await {
            Ok(report) => {
                tracing::info!(
                    video_id = %job.video_id,
                    "Finished {}: {} executed, {} fetched, {} skipped",
                    job,
                    report.executed.len(),
                    report.fetched.len(),
                    report.skipped.len()
                );
                true
            }
            Err(e) => {
                tracing::error!(video_id = %job.video_id, "Processing {} failed: {:#}", job, e);
                false
            }
        }
    }

    /// Existence snapshot for the enabled stages, without running anything
    pub async fn snapshot(&self, job: &VideoJob) -> ExistenceSnapshot {
        ExistenceSnapshot::capture(self.store.as_ref(), job, &self.plan.stages()).await
    }

    /// Process one job, returning what was done or why it failed
    pub async fn run(&self, job: &VideoJob, force: bool) -> Result<JobReport> {
        if !job.has_extension(&self.settings.source_extension) {
            return Err(PipelineError::InvalidSource(format!(
                "{} must have a .{} extension",
                job.source_file, self.settings.source_extension
            ))
            .into());
        }

        tracing::info!(
            video_id = %job.video_id,
            "Processing {} (folder '{}') on {}",
            job,
            job.folder,
            self.store.describe()
        );

        let stages = self.plan.stages();
        let snapshot = if force {
            tracing::info!("Force mode enabled - regenerating every stage");
            ExistenceSnapshot::all_missing(&stages)
        } else {
            self.snapshot(job).await
        };

        let mut report = JobReport::new(job);
        if snapshot.all_satisfied() {
            tracing::info!("All outputs already exist, nothing to do (use --force to regenerate)");
            report.skipped = stages;
            return Ok(report);
        }

        let pending: Vec<Stage> = snapshot.missing();
        tracing::info!(
            "Will process: {}",
            pending.iter().map(|s| s.label()).collect::<Vec<_>>().join(", ")
        );

        if !self.store.exists(&job.folder, &job.source_file).await {
            return Err(PipelineError::MissingSource(job.source_path()).into());
        }

        // Dropping the TempDir removes the working area on every exit path
        let workdir = self.create_workdir()?;
        let source = workdir.path().join(&job.source_file);
        self.store
            .get_to_file(&job.folder, &job.source_file, &source)
            .await
            .with_context(|| format!("Failed to download source {}", job.source_path()))?;
        tracing::debug!("Source downloaded to {}", source.display());

        let (required, wanted) = upstream_of(&pending);
        let mut available: BTreeMap<Stage, PathBuf> = BTreeMap::new();

        for stage in stages {
            if snapshot.is_satisfied(stage) {
                if wanted.contains(&stage) {
                    self.fetch_existing(job, stage, workdir.path(), required.contains(&stage), &mut available)
                        .await?;
                    report.fetched.push(stage);
                } else {
                    tracing::debug!(stage = %stage, "Skipping - output already exists");
                    report.skipped.push(stage);
                }
                continue;
            }

            let output = self
                .execute(job, stage, workdir.path(), &source, &available)
                .await?;
            available.insert(stage, output);
            report.executed.push(stage);
        }

        Ok(report)
    }

    fn create_workdir(&self) -> Result<TempDir> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("reelsmith-");
            builder
        };

        let dir = match &self.settings.temp_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.context("Failed to create working directory")
    }

    /// Download an already-satisfied artifact a pending stage will read
    async fn fetch_existing(
        &self,
        job: &VideoJob,
        stage: Stage,
        workdir: &Path,
        required: bool,
        available: &mut BTreeMap<Stage, PathBuf>,
    ) -> Result<()> {
        let filename = job.stage_filename(stage);
        let path = workdir.join(&filename);

        match self.store.get_to_file(&job.folder, &filename, &path).await {
            Ok(size) => {
                tracing::info!(stage = %stage, "Reusing existing {} ({} bytes)", filename, size);
                available.insert(stage, path);
                Ok(())
            }
            Err(e) if required => Err(PipelineError::StageFailed {
                stage: stage.to_string(),
                reason: format!("could not fetch existing {}: {:#}", filename, e),
            }
            .into()),
            Err(e) => {
                tracing::warn!(stage = %stage, "Optional input {} unavailable: {:#}", filename, e);
                Ok(())
            }
        }
    }

    /// Produce, persist and post-process one stage
    async fn execute(
        &self,
        job: &VideoJob,
        stage: Stage,
        workdir: &Path,
        source: &Path,
        available: &BTreeMap<Stage, PathBuf>,
    ) -> Result<PathBuf> {
        let executor = self.executors.get(stage).ok_or_else(|| PipelineError::StageFailed {
            stage: stage.to_string(),
            reason: "no executor registered".to_string(),
        })?;

        let ctx = StageContext::new(job, stage, workdir, source, available);
        let filename = job.stage_filename(stage);
        let output = ctx.output_path();
        let started = Instant::now();

        tracing::info!(stage = %stage, video_id = %job.video_id, "Running stage");

        let work = async {
            let entries = executor.produce(&ctx).await.map_err(|e| stage_failure(stage, e))?;

            let metadata = ObjectMetadata {
                content_type: stage.content_type().to_string(),
                entries,
            };
            if !self.store.put_file(&job.folder, &filename, &output, &metadata).await {
                return Err(anyhow::Error::new(PipelineError::Persist {
                    stage: stage.to_string(),
                    key: crate::storage::object_key(&job.folder, &filename),
                }));
            }

            executor
                .after_persist(&ctx, &output)
                .await
                .map_err(|e| stage_failure(stage, e))
        };

        match timeout(self.settings.stage_timeout, work).await {
            Ok(Ok(())) => {
                tracing::info!(
                    stage = %stage,
                    "Stored {} in {}",
                    filename,
                    format_duration(started.elapsed().as_secs_f64())
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                tracing::error!(stage = %stage, video_id = %job.video_id, "{:#}", e);
                Err(e)
            }
            Err(_) => {
                let seconds = self.settings.stage_timeout.as_secs();
                tracing::error!(stage = %stage, video_id = %job.video_id, "Deadline of {}s exceeded", seconds);
                Err(PipelineError::Timeout {
                    stage: stage.to_string(),
                    seconds,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl JobProcessor for PipelineOrchestrator {
    async fn process(&self, job: &VideoJob, force: bool) -> Result<JobReport> {
        self.run(job, force).await
    }
}

fn stage_failure(stage: Stage, error: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(PipelineError::StageFailed {
        stage: stage.to_string(),
        reason: format!("{:#}", error),
    })
}

/// Upstream stages of `pending`: (required by some pending stage, read by any)
fn upstream_of(pending: &[Stage]) -> (BTreeSet<Stage>, BTreeSet<Stage>) {
    let mut required = BTreeSet::new();
    let mut wanted = BTreeSet::new();

    for stage in pending {
        for dependency in stage.dependencies() {
            match dependency {
                Dependency::Required(upstream) => {
                    required.insert(*upstream);
                    wanted.insert(*upstream);
                }
                Dependency::Optional(upstream) => {
                    wanted.insert(*upstream);
                }
                Dependency::Source => {}
            }
        }
    }

    (required, wanted)
}
