//! Stage model, orchestration and batch processing.
//!
//! A [`VideoJob`] names a source video in the artifact store. The [`PipelineOrchestrator`]
//! snapshots which stage outputs already exist, then runs the missing stages in topological
//! order, persisting each output before moving on. The [`BatchRunner`] applies the
//! orchestrator to a playlist.

pub mod batch;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod snapshot;
pub mod stage;

pub use batch::{
    BatchItem, BatchOutcome, BatchResult, BatchRunner, JobStatus, OrderingPolicy, Playlist,
    PlaylistEntry,
};
pub use executor::{ExecutorRegistry, StageContext, StageExecutor, StageMetadata};
pub use job::VideoJob;
pub use orchestrator::{JobProcessor, JobReport, OrchestratorSettings, PipelineOrchestrator};
pub use snapshot::ExistenceSnapshot;
pub use stage::{Dependency, Stage, StagePlan};
