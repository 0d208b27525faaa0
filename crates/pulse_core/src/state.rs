use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::phase::{AnalysisStatus, AnalysisStep, FetchPhase, StepStatus};
use crate::view_model::{JobView, StepView};
use crate::weights::{compute_overall_percent, ErrorPercent, PhaseWeights};

/// Opaque server-side job identifier.
///
/// Servers hand out either numeric or string ids; both are kept verbatim so
/// the id can be echoed back as a room key or URL segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Numeric(u64),
    Text(String),
}

impl JobId {
    /// Parses user input: all-digit strings become numeric ids.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<u64>() {
            Ok(n) => Some(Self::Numeric(n)),
            Err(_) => Some(Self::Text(trimmed.to_string())),
        }
    }

    /// Reads an id out of a JSON value (number or non-empty string).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self::Numeric),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Which pipeline a tracker observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobKind {
    /// Fetch-and-download pipeline, pushed over the shared connection.
    #[default]
    Fetch,
    /// Five-stage AI analysis, pulled by status polling.
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchCounters {
    pub fetched: u64,
    pub target: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub downloaded: u64,
    pub download_failed: u64,
    pub download_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchProgress {
    pub phase: FetchPhase,
    pub counters: FetchCounters,
    pub message: Option<String>,
    /// Pipeline phase that was running when the job failed.
    pub failed_during: Option<FetchPhase>,
}

impl FetchProgress {
    /// Per-phase statuses for stepper display.
    pub fn phase_statuses(&self) -> [StepStatus; 3] {
        let mut statuses = [StepStatus::Pending; 3];
        match self.phase {
            FetchPhase::Done => statuses = [StepStatus::Done; 3],
            FetchPhase::Error => {
                let failed = self.failed_during.unwrap_or(FetchPhase::Fetching);
                for (slot, phase) in statuses.iter_mut().zip(FetchPhase::PIPELINE) {
                    *slot = match phase.ordinal().cmp(&failed.ordinal()) {
                        std::cmp::Ordering::Less => StepStatus::Done,
                        std::cmp::Ordering::Equal => StepStatus::Error,
                        std::cmp::Ordering::Greater => StepStatus::Pending,
                    };
                }
            }
            current => {
                for (slot, phase) in statuses.iter_mut().zip(FetchPhase::PIPELINE) {
                    *slot = match phase.ordinal().cmp(&current.ordinal()) {
                        std::cmp::Ordering::Less => StepStatus::Done,
                        std::cmp::Ordering::Equal => StepStatus::Running,
                        std::cmp::Ordering::Greater => StepStatus::Pending,
                    };
                }
            }
        }
        statuses
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisProgress {
    pub status: AnalysisStatus,
    /// Indexed by [`AnalysisStep::index`].
    pub steps: [StepStatus; 5],
    pub error: Option<String>,
}

impl AnalysisProgress {
    pub fn step(&self, step: AnalysisStep) -> StepStatus {
        self.steps[step.index()]
    }

    pub fn done_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|status| **status == StepStatus::Done)
            .count()
    }
}

/// Normalized progress of one job, whichever pipeline it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Fetch(FetchProgress),
    Analysis(AnalysisProgress),
}

impl Progress {
    /// Initial state shown before the first snapshot arrives.
    pub fn placeholder(kind: JobKind) -> Self {
        match kind {
            JobKind::Fetch => Self::Fetch(FetchProgress::default()),
            JobKind::Analysis => Self::Analysis(AnalysisProgress::default()),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Fetch(_) => JobKind::Fetch,
            Self::Analysis(_) => JobKind::Analysis,
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::Fetch(p) => p.phase == FetchPhase::Done,
            Self::Analysis(p) => p.status == AnalysisStatus::Completed,
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            Self::Fetch(p) => p.phase == FetchPhase::Error,
            Self::Analysis(p) => p.status == AnalysisStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_done() || self.is_error()
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Fetch(p) => p.message.as_deref(),
            Self::Analysis(p) => p.error.as_deref(),
        }
    }

    pub fn phase_label(&self) -> &'static str {
        match self {
            Self::Fetch(p) => p.phase.as_str(),
            Self::Analysis(p) => p.status.as_str(),
        }
    }

    /// Sequence position used to reject stale snapshots.
    pub(crate) fn ordinal(&self) -> (u8, u8) {
        match self {
            Self::Fetch(p) => (p.phase.ordinal(), 0),
            Self::Analysis(p) => (p.status.ordinal(), p.done_steps() as u8),
        }
    }

    /// Marks the job failed locally (deadline cut-off).
    pub(crate) fn force_error(&mut self, message: &str) {
        match self {
            Self::Fetch(p) => {
                if !p.phase.is_terminal() {
                    p.failed_during = Some(p.phase);
                }
                p.phase = FetchPhase::Error;
                p.message = Some(message.to_string());
            }
            Self::Analysis(p) => {
                for status in p.steps.iter_mut() {
                    if *status == StepStatus::Running {
                        *status = StepStatus::Error;
                    }
                }
                p.status = AnalysisStatus::Error;
                p.error = Some(message.to_string());
            }
        }
    }

    /// Starting point for a retried job: steps the server already finished
    /// stay done, everything else goes back to pending.
    pub(crate) fn retry_baseline(&self) -> Self {
        match self {
            Self::Fetch(_) => Self::Fetch(FetchProgress::default()),
            Self::Analysis(p) => {
                let mut steps = [StepStatus::Pending; 5];
                for (slot, previous) in steps.iter_mut().zip(p.steps) {
                    if previous == StepStatus::Done {
                        *slot = StepStatus::Done;
                    }
                }
                Self::Analysis(AnalysisProgress {
                    status: AnalysisStatus::Pending,
                    steps,
                    error: None,
                })
            }
        }
    }

    pub(crate) fn step_views(&self) -> Vec<StepView> {
        match self {
            Self::Fetch(p) => FetchPhase::PIPELINE
                .into_iter()
                .zip(p.phase_statuses())
                .map(|(phase, status)| StepView {
                    key: phase.as_str(),
                    label: fetch_phase_label(phase),
                    status,
                })
                .collect(),
            Self::Analysis(p) => AnalysisStep::ALL
                .into_iter()
                .map(|step| StepView {
                    key: step.key(),
                    label: step.label(),
                    status: p.step(step),
                })
                .collect(),
        }
    }
}

fn fetch_phase_label(phase: FetchPhase) -> &'static str {
    match phase {
        FetchPhase::Fetching => "Fetching",
        FetchPhase::Processing => "Processing",
        FetchPhase::Downloading => "Downloading",
        FetchPhase::Done => "Done",
        FetchPhase::Error => "Error",
    }
}

/// Coarse tracker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Active,
    Done,
    Error,
}

/// Client-side record of the tracked job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub(crate) job_id: JobId,
    pub(crate) progress: Progress,
    pub(crate) percent: u8,
    pub(crate) last_seq: Option<u64>,
    pub(crate) completion_notified: bool,
}

impl JobRecord {
    pub(crate) fn new(job_id: JobId, progress: Progress, weights: &PhaseWeights) -> Self {
        let percent = compute_overall_percent(&progress, weights);
        Self {
            job_id,
            progress,
            percent,
            last_seq: None,
            completion_notified: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }
}

/// Complete state of one job progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerState {
    kind: JobKind,
    lifecycle: Lifecycle,
    record: Option<JobRecord>,
    /// Subscription generation; deliveries tagged with another epoch are stale.
    epoch: u64,
    retry_pending: bool,
    weights: PhaseWeights,
    error_percent: ErrorPercent,
    dirty: bool,
}

impl TrackerState {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_weights(mut self, weights: PhaseWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_error_percent(mut self, error_percent: ErrorPercent) -> Self {
        self.error_percent = error_percent;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn record(&self) -> Option<&JobRecord> {
        self.record.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.record.as_ref().map(|record| &record.job_id)
    }

    pub fn view(&self) -> JobView {
        match &self.record {
            Some(record) => JobView {
                job_id: Some(record.job_id.clone()),
                kind: self.kind,
                lifecycle: self.lifecycle,
                phase: record.progress.phase_label(),
                message: record.progress.message().map(ToOwned::to_owned),
                percent: record.percent,
                steps: record.progress.step_views(),
                counters: match &record.progress {
                    Progress::Fetch(p) => Some(p.counters),
                    Progress::Analysis(_) => None,
                },
                can_retry: self.lifecycle == Lifecycle::Error && !self.retry_pending,
                can_dismiss: true,
                terminal: matches!(self.lifecycle, Lifecycle::Done | Lifecycle::Error),
            },
            None => {
                let placeholder = Progress::placeholder(self.kind);
                JobView {
                    job_id: None,
                    kind: self.kind,
                    lifecycle: self.lifecycle,
                    phase: placeholder.phase_label(),
                    message: None,
                    percent: 0,
                    steps: placeholder.step_views(),
                    counters: None,
                    can_retry: false,
                    can_dismiss: true,
                    terminal: false,
                }
            }
        }
    }

    /// Returns whether the view changed since the last call, clearing the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn weights(&self) -> &PhaseWeights {
        &self.weights
    }

    pub(crate) fn error_percent(&self) -> ErrorPercent {
        self.error_percent
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn record_mut(&mut self) -> Option<&mut JobRecord> {
        self.record.as_mut()
    }

    pub(crate) fn replace_record(&mut self, record: Option<JobRecord>) -> Option<JobRecord> {
        std::mem::replace(&mut self.record, record)
    }

    pub(crate) fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub(crate) fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub(crate) fn set_retry_pending(&mut self, pending: bool) {
        self.retry_pending = pending;
    }
}
