use std::sync::Arc;
use std::time::Duration;

use pulse_core::JobId;
use pulse_logging::{pulse_debug, pulse_warn};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::settings::{endpoint, PollSettings};
use crate::transport::{Delivery, GuardedSink, SnapshotSink, Transport, TransportHandle};
use crate::TransportError;

/// Retrieves the latest status snapshot of a job on demand.
#[async_trait::async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, job_id: &JobId) -> Result<Value, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    settings: PollSettings,
}

impl HttpStatusFetcher {
    pub fn new(settings: PollSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn status_url(&self, job_id: &JobId) -> Result<Url, TransportError> {
        endpoint(
            &self.settings.base_url,
            &self.settings.status_path,
            Some(&job_id.to_string()),
        )
        .map_err(|err| TransportError::Malformed(format!("status url: {err}")))
    }
}

#[async_trait::async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_status(&self, job_id: &JobId) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(self.status_url(job_id)?)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(TransportError::from_reqwest)?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|err| TransportError::Malformed(err.to_string()))?;
        if !value.is_object() {
            return Err(TransportError::Malformed("expected a JSON object".into()));
        }
        Ok(value)
    }
}

/// Pull transport: one fetch immediately, then one per interval.
///
/// Fetches for a job never overlap; a slow response delays the next tick
/// instead of racing it. Each delivery carries an increasing sequence number.
pub struct PollTransport {
    fetcher: Arc<dyn StatusFetcher>,
    interval: Duration,
}

impl PollTransport {
    pub fn new(fetcher: Arc<dyn StatusFetcher>, interval: Duration) -> Self {
        Self { fetcher, interval }
    }

    pub fn http(settings: PollSettings) -> Result<Self, TransportError> {
        let interval = settings.interval();
        let fetcher = HttpStatusFetcher::new(settings)?;
        Ok(Self::new(Arc::new(fetcher), interval))
    }
}

impl Transport for PollTransport {
    fn start(&self, job_id: &JobId, epoch: u64, sink: Arc<dyn SnapshotSink>) -> TransportHandle {
        let token = CancellationToken::new();
        let sink = GuardedSink::new(sink, token.clone());
        tokio::spawn(poll_loop(
            self.fetcher.clone(),
            job_id.clone(),
            epoch,
            self.interval,
            sink,
            token.clone(),
        ));
        TransportHandle::new(token)
    }
}

async fn poll_loop(
    fetcher: Arc<dyn StatusFetcher>,
    job_id: JobId,
    epoch: u64,
    interval: Duration,
    sink: GuardedSink,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;

    loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = fetcher.fetch_status(&job_id) => result,
        };

        seq += 1;
        match result {
            Ok(payload) => {
                pulse_debug!("poll job={} seq={} ok", job_id, seq);
                sink.snapshot(Delivery {
                    job_id: job_id.clone(),
                    epoch,
                    seq: Some(seq),
                    payload,
                });
            }
            Err(err) => {
                pulse_warn!("poll job={} seq={} failed: {}", job_id, seq, err);
                sink.transport_error(&job_id, epoch, err);
            }
        }
    }
    pulse_debug!("poll job={} stopped after {} fetches", job_id, seq);
}
