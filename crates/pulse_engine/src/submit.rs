use pulse_core::{JobId, JobKind};
use pulse_logging::pulse_info;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::settings::{endpoint, SubmitSettings};
use crate::SubmitError;

/// Keys a submission response may carry the new job id under, in order.
const ID_KEYS: [&str; 4] = ["id", "jobId", "analysisId", "entityId"];

/// What to start: the content URL plus any endpoint-specific options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl SubmitRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Starts server-side work and hands back the id to track.
#[async_trait::async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobId, SubmitError>;

    /// Restarts a failed job. The returned id may equal `previous`.
    async fn resubmit(&self, previous: &JobId) -> Result<JobId, SubmitError>;
}

#[derive(Debug, Clone)]
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    settings: SubmitSettings,
    kind: JobKind,
}

impl HttpJobSubmitter {
    pub fn new(settings: SubmitSettings, kind: JobKind) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|err| SubmitError::Network(err.to_string()))?;
        Ok(Self {
            client,
            settings,
            kind,
        })
    }

    fn submit_url(&self) -> Result<Url, SubmitError> {
        let path = match self.kind {
            JobKind::Analysis => &self.settings.analysis_path,
            JobKind::Fetch => &self.settings.fetch_path,
        };
        endpoint(&self.settings.base_url, path, None).map_err(bad_url)
    }

    fn retry_url(&self, previous: &JobId) -> Result<Url, SubmitError> {
        let path = match self.kind {
            JobKind::Analysis => &self.settings.analysis_retry_path,
            JobKind::Fetch => &self.settings.fetch_retry_path,
        };
        endpoint(&self.settings.base_url, path, Some(&previous.to_string())).map_err(bad_url)
    }

    async fn post(&self, url: Url, body: Vec<u8>) -> Result<JobId, SubmitError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(SubmitError::from_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(SubmitError::from_reqwest)?;
        if !status.is_success() {
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| SubmitError::Malformed(err.to_string()))?;
        job_id_from_response(&value).ok_or(SubmitError::MissingJobId)
    }
}

#[async_trait::async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobId, SubmitError> {
        let body =
            serde_json::to_vec(request).map_err(|err| SubmitError::Malformed(err.to_string()))?;
        let job_id = self.post(self.submit_url()?, body).await?;
        pulse_info!("submitted {:?} job={} url={}", self.kind, job_id, request.url);
        Ok(job_id)
    }

    async fn resubmit(&self, previous: &JobId) -> Result<JobId, SubmitError> {
        let job_id = self.post(self.retry_url(previous)?, b"{}".to_vec()).await?;
        pulse_info!("resubmitted {:?} job={} as job={}", self.kind, previous, job_id);
        Ok(job_id)
    }
}

fn bad_url(err: url::ParseError) -> SubmitError {
    SubmitError::Malformed(format!("submission url: {err}"))
}

/// Finds the job id in a submission response, looking one level into `data`
/// as well.
fn job_id_from_response(value: &Value) -> Option<JobId> {
    let direct = ID_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(JobId::from_json));
    direct.or_else(|| value.get("data").and_then(job_id_from_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_found_under_known_keys() {
        assert_eq!(job_id_from_response(&json!({ "id": 5 })), Some(JobId::Numeric(5)));
        assert_eq!(
            job_id_from_response(&json!({ "analysisId": "an_9" })),
            Some(JobId::Text("an_9".into()))
        );
        assert_eq!(
            job_id_from_response(&json!({ "data": { "jobId": 12 } })),
            Some(JobId::Numeric(12))
        );
        assert_eq!(job_id_from_response(&json!({ "ok": true })), None);
    }

    #[test]
    fn request_flattens_options() {
        let request = SubmitRequest::new("https://video.example/v/1").with_option("platform", "tiktok");
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({ "url": "https://video.example/v/1", "platform": "tiktok" })
        );
    }
}
