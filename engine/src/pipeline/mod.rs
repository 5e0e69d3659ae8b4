//! Pipeline state machine
//!
//! - [`state`]: stages, the persisted [`PipelineState`] and stage outputs
//! - [`checkpoint`]: the [`CheckpointStore`] seam
//! - [`orchestrator`]: sequencing, suspension and resume

pub mod checkpoint;
pub mod orchestrator;
pub mod state;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use orchestrator::{Orchestrator, ResumeWith, RunOutcome};
pub use state::{PartialOutputs, PipelineState, ReviewPoint, RunOptions, Stage, StageOutput};
