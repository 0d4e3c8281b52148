pub mod context;
pub mod correlator;
pub mod driver;
pub mod error;
pub mod executor;
pub mod lane;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod recovery;

pub use context::ExecutionContext;
pub use correlator::{StepCorrelator, StepReply};
pub use driver::{DriveOutcome, ExecutionDriver};
pub use error::SchedulerError;
pub use executor::{StepError, StepErrorKind, StepFailure, StepRunner};
pub use model::{ExecutionSnapshot, ScheduledTask, SchedulerConfig, TaskSource};
pub use orchestrator::{SchedulerDeps, TaskScheduler};
pub use recovery::{RecoveryOutcome, RecoveryPolicy};
