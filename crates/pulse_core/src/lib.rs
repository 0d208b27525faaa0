//! Jobpulse core: pure job-progress state machine and view-model helpers.
mod effect;
mod msg;
mod phase;
mod snapshot;
mod state;
mod update;
mod view_model;
mod weights;

pub use effect::Effect;
pub use msg::Msg;
pub use phase::{AnalysisStatus, AnalysisStep, FetchPhase, StepStatus};
pub use snapshot::normalize;
pub use state::{
    AnalysisProgress, FetchCounters, FetchProgress, JobId, JobKind, JobRecord, Lifecycle,
    Progress, TrackerState,
};
pub use update::update;
pub use view_model::{JobView, StepView};
pub use weights::{compute_overall_percent, ErrorPercent, PhaseWeights, ACTIVE_CEILING};
