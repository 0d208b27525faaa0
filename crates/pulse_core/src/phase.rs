use std::fmt;

/// Coarse phase of a fetch-and-download job, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchPhase {
    #[default]
    Fetching,
    Processing,
    Downloading,
    Done,
    Error,
}

impl FetchPhase {
    /// Phases that make up the pipeline, excluding the terminal ones.
    pub const PIPELINE: [FetchPhase; 3] = [
        FetchPhase::Fetching,
        FetchPhase::Processing,
        FetchPhase::Downloading,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fetching" => Some(Self::Fetching),
            "processing" => Some(Self::Processing),
            "downloading" => Some(Self::Downloading),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Position in the pipeline. `Error` has no position and sorts last so it
    /// can always be applied.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Fetching => 0,
            Self::Processing => 1,
            Self::Downloading => 2,
            Self::Done => 3,
            Self::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step in a stepped pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl StepStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal step transition.
    ///
    /// `pending -> running -> {done, error}`; skipping `running` is allowed
    /// because polling can miss it. `error -> pending` only happens on retry
    /// and is not accepted from a snapshot.
    pub fn can_become(self, next: StepStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (Self::Pending, _) => true,
            (Self::Running, Self::Done | Self::Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five stages of an AI analysis run, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisStep {
    Upload,
    FullAnalysis,
    HookAnalysis,
    ViralityScores,
    Improvement,
}

impl AnalysisStep {
    pub const ALL: [AnalysisStep; 5] = [
        AnalysisStep::Upload,
        AnalysisStep::FullAnalysis,
        AnalysisStep::HookAnalysis,
        AnalysisStep::ViralityScores,
        AnalysisStep::Improvement,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::FullAnalysis => "full_analysis",
            Self::HookAnalysis => "hook_analysis",
            Self::ViralityScores => "virality_scores",
            Self::Improvement => "improvement",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Upload => "Upload",
            Self::FullAnalysis => "Full analysis",
            Self::HookAnalysis => "Hook analysis",
            Self::ViralityScores => "Virality scores",
            Self::Improvement => "Improvements",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.key() == key)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Overall status reported by the analysis status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Analyzing,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "analyzing" => Some(Self::Analyzing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Analyzing => 1,
            Self::Completed => 2,
            Self::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
