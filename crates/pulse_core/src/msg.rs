use serde_json::Value;

use crate::JobId;

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Caller started tracking a job id.
    Begin { job_id: JobId },
    /// A transport delivered a raw snapshot.
    Snapshot {
        job_id: JobId,
        epoch: u64,
        /// Delivery order assigned by the transport, when it has one.
        seq: Option<u64>,
        payload: Value,
    },
    /// A transport hit a recoverable failure (dropped connection, bad poll).
    TransportFailed {
        job_id: JobId,
        epoch: u64,
        reason: String,
    },
    /// User asked to retry a failed job.
    RetryRequested,
    /// The submission collaborator accepted the retry.
    Resubmitted { job_id: JobId },
    /// The submission collaborator rejected the retry.
    ResubmitFailed { reason: String },
    /// The configured maximum tracking duration ran out.
    DeadlineElapsed { job_id: JobId, epoch: u64 },
    /// Consumer tore the tracker down or dismissed the job.
    End,
    NoOp,
}
