use pulse_core::JobId;
use thiserror::Error;

/// Recoverable failure while delivering snapshots. Never ends a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus(status.as_u16())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Failure to start or restart a job. No job exists when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("submission rejected with http status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("response did not contain a job id")]
    MissingJobId,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("job is not in a retryable state")]
    NotRetryable,
    /// The server accepted the retry but the tracker was ended or switched
    /// to another job meanwhile. The restarted job is not tracked.
    #[error("retry accepted as job {job_id} after tracking moved on")]
    Superseded { job_id: JobId },
}

impl SubmitError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SubmitError::Timeout
        } else {
            SubmitError::Network(err.to_string())
        }
    }
}
