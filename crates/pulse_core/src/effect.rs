use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Attach a transport for `job_id`, tagging deliveries with `epoch`.
    StartTransport { job_id: JobId, epoch: u64 },
    /// Detach the transport started under `epoch`.
    StopTransport { job_id: JobId, epoch: u64 },
    /// Schedule a `DeadlineElapsed` if a maximum duration is configured.
    ArmDeadline { job_id: JobId, epoch: u64 },
    /// Re-submit the failed job to the server.
    Resubmit { previous: JobId },
    /// First `done` observed for this job.
    NotifyComplete { job_id: JobId },
    NotifyFailed { job_id: JobId, message: String },
}
