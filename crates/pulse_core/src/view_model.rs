use crate::{FetchCounters, JobId, JobKind, Lifecycle, StepStatus};

/// Everything a presenter needs to draw one tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobView {
    pub job_id: Option<JobId>,
    pub kind: JobKind,
    pub lifecycle: Lifecycle,
    /// Current coarse phase or overall status, lowercase.
    pub phase: &'static str,
    /// Latest server message, verbatim.
    pub message: Option<String>,
    pub percent: u8,
    pub steps: Vec<StepView>,
    pub counters: Option<FetchCounters>,
    pub can_retry: bool,
    pub can_dismiss: bool,
    pub terminal: bool,
}

impl JobView {
    /// Status of a step by its key (`"upload"`, `"downloading"`, ...).
    pub fn step_status(&self, key: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|step| step.key == key)
            .map(|step| step.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub key: &'static str,
    pub label: &'static str,
    pub status: StepStatus,
}
