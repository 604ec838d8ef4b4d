pub mod error;
pub mod job;
pub mod mesh;
pub mod stage;
mod view;

pub use error::{Error, FailureKind, Result};
pub use job::{GenerateOptions, InitType, JobArtifacts, JobRequest, JobResult, JobStatus};
pub use mesh::{Mesh, Texture, normalize};
pub use stage::{Stage, StageEvent, StageMachine, StageOutcome, WorkerEvent};
pub use view::{CanonicalView, VIEW_COUNT};
