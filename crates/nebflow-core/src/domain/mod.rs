//! Domain model (IDs, statuses, stages, runs, events, outcomes, errors).

pub mod cancel;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod run;
pub mod stage;
pub mod status;

pub use self::cancel::{CancelRequest, CancelSignal, cancel_pair};
pub use self::errors::{BuildError, ControllerError, SinkError, StageError};
pub use self::events::PipelineEvent;
pub use self::ids::{JobId, RunId};
pub use self::outcome::{RunOutcome, StageFailure};
pub use self::run::{Pipeline, PipelineBuilder, PipelineRun};
pub use self::stage::{Stage, StageInputs, StageKind, StageRole};
pub use self::status::JobStatus;
