use std::time::Duration;

use pulse_core::{ErrorPercent, PhaseWeights};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid url for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("{field} must contain the {{id}} placeholder")]
    MissingPlaceholder { field: &'static str },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("phase weights must add up to 100, got {total}")]
    WeightsTotal { total: u32 },
}

/// Status polling for analysis jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub base_url: String,
    /// Path of the status endpoint; `{id}` is replaced by the job id.
    pub status_path: String,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            status_path: "/api/analysis/{id}/status".to_string(),
            interval_ms: 2_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Shared push connection for fetch jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    pub url: String,
    /// Name of the event that carries progress snapshots.
    pub event: String,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            event: "fetch-progress".to_string(),
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl PushSettings {
    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

/// Endpoints that start and restart jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitSettings {
    pub base_url: String,
    pub analysis_path: String,
    /// `{id}` is replaced by the failed job id.
    pub analysis_retry_path: String,
    pub fetch_path: String,
    /// `{id}` is replaced by the failed job's entity id.
    pub fetch_retry_path: String,
    pub request_timeout_ms: u64,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            analysis_path: "/api/analysis".to_string(),
            analysis_retry_path: "/api/analysis/{id}/retry".to_string(),
            fetch_path: "/api/influencers/fetch".to_string(),
            fetch_retry_path: "/api/influencers/{id}/fetch".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl SubmitSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Everything the tracker runtime can be configured with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub poll: PollSettings,
    pub push: PushSettings,
    pub submit: SubmitSettings,
    pub weights: PhaseWeights,
    pub error_percent: ErrorPercent,
    /// Give up on a job that has not finished after this long. Unset tracks
    /// until the consumer tears down.
    pub max_duration_ms: Option<u64>,
}

impl TrackerSettings {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check_url("poll.base_url", &self.poll.base_url, &["http", "https"])?;
        check_url("push.url", &self.push.url, &["ws", "wss"])?;
        check_url("submit.base_url", &self.submit.base_url, &["http", "https"])?;
        check_placeholder("poll.status_path", &self.poll.status_path)?;
        check_placeholder("submit.analysis_retry_path", &self.submit.analysis_retry_path)?;
        check_placeholder("submit.fetch_retry_path", &self.submit.fetch_retry_path)?;
        if self.poll.interval_ms == 0 {
            return Err(SettingsError::Zero {
                field: "poll.interval_ms",
            });
        }
        if self.weights.total() != 100 {
            return Err(SettingsError::WeightsTotal {
                total: self.weights.total(),
            });
        }
        if self.max_duration_ms == Some(0) {
            return Err(SettingsError::Zero {
                field: "max_duration_ms",
            });
        }
        Ok(())
    }
}

/// Joins a base url and a path template, substituting `{id}`.
///
/// The id is percent-encoded as part of its path segment, so ids holding
/// `/`, `?` or `#` stay inside that segment.
pub(crate) fn endpoint(base_url: &str, path: &str, id: Option<&str>) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
        segments.pop_if_empty();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            match id {
                Some(id) => segments.push(&segment.replace("{id}", id)),
                None => segments.push(segment),
            };
        }
    }
    Ok(url)
}

fn check_url(field: &'static str, raw: &str, schemes: &[&str]) -> Result<(), SettingsError> {
    let parsed = Url::parse(raw).map_err(|err| SettingsError::InvalidUrl {
        field,
        reason: err.to_string(),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(SettingsError::InvalidUrl {
            field,
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(())
}

fn check_placeholder(field: &'static str, path: &str) -> Result<(), SettingsError> {
    if path.contains("{id}") {
        Ok(())
    } else {
        Err(SettingsError::MissingPlaceholder { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrackerSettings::default().validate().expect("valid defaults");
    }

    #[test]
    fn rejects_http_push_url() {
        let mut settings = TrackerSettings::default();
        settings.push.url = "http://example.com/ws".into();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidUrl { field: "push.url", .. })
        ));
    }

    #[test]
    fn rejects_status_path_without_placeholder() {
        let mut settings = TrackerSettings::default();
        settings.poll.status_path = "/api/analysis/status".into();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::MissingPlaceholder { .. })
        ));
    }

    #[test]
    fn rejects_weights_not_adding_up() {
        let mut settings = TrackerSettings::default();
        settings.weights.processing = 20;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::WeightsTotal { total: 110 })
        ));
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("http://host/", "/api/analysis/{id}/status", Some("42"))
                .unwrap()
                .as_str(),
            "http://host/api/analysis/42/status"
        );
        assert_eq!(
            endpoint("http://host", "api/analysis", None).unwrap().as_str(),
            "http://host/api/analysis"
        );
        assert_eq!(
            endpoint("http://host/v2/", "/jobs/{id}", Some("7")).unwrap().as_str(),
            "http://host/v2/jobs/7"
        );
    }

    #[test]
    fn endpoint_keeps_text_ids_inside_their_segment() {
        assert_eq!(
            endpoint("http://host", "/api/analysis/{id}/status", Some("a/b?c#d"))
                .unwrap()
                .as_str(),
            "http://host/api/analysis/a%2Fb%3Fc%23d/status"
        );
    }

    #[test]
    fn endpoint_rejects_unusable_base() {
        assert!(endpoint("not a url", "/api", None).is_err());
    }
}
