use serde::{Deserialize, Serialize};

use crate::phase::{AnalysisStatus, FetchPhase};
use crate::state::{AnalysisProgress, FetchProgress, Progress};

/// Highest percentage reported while a job is still running.
pub const ACTIVE_CEILING: u8 = 99;

/// Share of 100% allotted to each phase of the fetch pipeline.
///
/// `processing` carries no counters of its own: while it runs the bar holds at
/// the end of the fetching band, and its share is the headroom between the
/// end of the download band and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseWeights {
    pub fetching: u8,
    pub processing: u8,
    pub downloading: u8,
}

impl PhaseWeights {
    /// Sum of the three bands; a usable configuration adds up to 100.
    pub fn total(&self) -> u32 {
        u32::from(self.fetching) + u32::from(self.processing) + u32::from(self.downloading)
    }

    /// Highest value the fetch pipeline reaches before it is done.
    fn running_cap(&self) -> u32 {
        100u32.saturating_sub(u32::from(self.processing))
    }
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            fetching: 30,
            processing: 10,
            downloading: 60,
        }
    }
}

/// What the bar shows once a job has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPercent {
    /// Drop to 0.
    #[default]
    Reset,
    /// Keep the last value reached before the failure.
    HoldLast,
}

/// Overall completion of a job in `0..=100`.
///
/// Deterministic in `progress` alone. Running jobs are clamped to
/// [`ACTIVE_CEILING`]; only a done job reports 100, and a failed job reports 0.
pub fn compute_overall_percent(progress: &Progress, weights: &PhaseWeights) -> u8 {
    match progress {
        Progress::Fetch(p) => fetch_percent(p, weights),
        Progress::Analysis(p) => analysis_percent(p),
    }
}

fn fetch_percent(progress: &FetchProgress, weights: &PhaseWeights) -> u8 {
    let c = &progress.counters;
    let raw = match progress.phase {
        FetchPhase::Done => return 100,
        FetchPhase::Error => return 0,
        FetchPhase::Fetching => band(c.fetched, c.target, weights.fetching),
        FetchPhase::Processing => u32::from(weights.fetching),
        FetchPhase::Downloading => {
            let attempted = c.downloaded.saturating_add(c.download_failed);
            u32::from(weights.fetching) + band(attempted, c.download_total, weights.downloading)
        }
    };
    clamp_active(raw.min(weights.running_cap()))
}

fn analysis_percent(progress: &AnalysisProgress) -> u8 {
    match progress.status {
        AnalysisStatus::Completed => 100,
        AnalysisStatus::Error => 0,
        AnalysisStatus::Pending | AnalysisStatus::Analyzing => {
            let per_step = 100 / progress.steps.len() as u32;
            clamp_active(progress.done_steps() as u32 * per_step)
        }
    }
}

/// `round(done / total * width)`, with the ratio capped at 1.
fn band(done: u64, total: u64, width: u8) -> u32 {
    if total == 0 {
        return 0;
    }
    let ratio = (done as f64 / total as f64).min(1.0);
    (ratio * f64::from(width)).round() as u32
}

fn clamp_active(raw: u32) -> u8 {
    raw.min(u32::from(ACTIVE_CEILING)) as u8
}
