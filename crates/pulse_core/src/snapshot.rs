//! Lenient normalization of raw snapshot payloads.
//!
//! Payloads come straight off the wire and may be partial or carry fields of
//! the wrong type. A field that is missing or unreadable keeps its previous
//! value; nothing here fails.

use serde_json::{Map, Value};

use crate::phase::{AnalysisStatus, AnalysisStep, FetchPhase, StepStatus};
use crate::state::{AnalysisProgress, FetchProgress, Progress};

const DEFAULT_ANALYSIS_ERROR: &str = "Analysis failed";

/// Folds `payload` into `previous`. Returns `None` when the payload is not a
/// JSON object at all.
pub fn normalize(previous: &Progress, payload: &Value) -> Option<Progress> {
    let fields = payload.as_object()?;
    Some(match previous {
        Progress::Fetch(prev) => Progress::Fetch(apply_fetch(prev, fields)),
        Progress::Analysis(prev) => Progress::Analysis(apply_analysis(prev, fields)),
    })
}

fn apply_fetch(prev: &FetchProgress, fields: &Map<String, Value>) -> FetchProgress {
    let mut next = prev.clone();
    if let Some(phase) = read_str(fields, &["phase"]).and_then(FetchPhase::parse) {
        if phase == FetchPhase::Error && !prev.phase.is_terminal() {
            next.failed_during = Some(prev.phase);
        }
        next.phase = phase;
    }
    if let Some(message) = read_str(fields, &["message"]) {
        next.message = Some(message.to_string());
    }

    let c = &mut next.counters;
    update_count(&mut c.fetched, fields, &["fetched"]);
    update_count(&mut c.target, fields, &["target"]);
    update_count(&mut c.created, fields, &["created"]);
    update_count(&mut c.updated, fields, &["updated"]);
    update_count(&mut c.skipped, fields, &["skipped"]);
    update_count(&mut c.downloaded, fields, &["downloaded"]);
    update_count(&mut c.download_failed, fields, &["downloadFailed", "download_failed"]);
    update_count(&mut c.download_total, fields, &["downloadTotal", "download_total"]);
    next
}

fn apply_analysis(prev: &AnalysisProgress, fields: &Map<String, Value>) -> AnalysisProgress {
    let mut next = prev.clone();
    if let Some(status) = read_str(fields, &["status"]).and_then(AnalysisStatus::parse) {
        next.status = status;
    }
    if let Some(steps) = fields.get("steps").and_then(Value::as_object) {
        for (key, raw) in steps {
            let Some(step) = AnalysisStep::from_key(key) else {
                continue;
            };
            let Some(status) = raw.as_str().and_then(StepStatus::parse) else {
                continue;
            };
            let slot = &mut next.steps[step.index()];
            if slot.can_become(status) {
                *slot = status;
            }
        }
    }
    if let Some(error) = read_str(fields, &["error"]) {
        next.error = Some(error.to_string());
    }
    if next.status == AnalysisStatus::Error && next.error.is_none() {
        next.error = Some(DEFAULT_ANALYSIS_ERROR.to_string());
    }
    next
}

fn read_str<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
}

fn read_count(fields: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn update_count(slot: &mut u64, fields: &Map<String, Value>, keys: &[&str]) {
    if let Some(value) = read_count(fields, keys) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FetchCounters, JobKind};
    use serde_json::json;

    #[test]
    fn missing_fields_keep_previous_values() {
        let previous = Progress::Fetch(FetchProgress {
            phase: FetchPhase::Fetching,
            counters: FetchCounters {
                fetched: 20,
                target: 100,
                ..FetchCounters::default()
            },
            message: Some("Fetching posts".into()),
            failed_during: None,
        });

        let next = normalize(&previous, &json!({ "fetched": 35 })).unwrap();
        let Progress::Fetch(next) = next else {
            panic!("kind changed");
        };
        assert_eq!(next.counters.fetched, 35);
        assert_eq!(next.counters.target, 100);
        assert_eq!(next.message.as_deref(), Some("Fetching posts"));
    }

    #[test]
    fn mistyped_fields_are_ignored() {
        let previous = Progress::placeholder(JobKind::Fetch);
        let next = normalize(
            &previous,
            &json!({ "phase": 7, "target": "120", "fetched": [1], "downloadTotal": -4 }),
        )
        .unwrap();
        let Progress::Fetch(next) = next else {
            panic!("kind changed");
        };
        assert_eq!(next.phase, FetchPhase::Fetching);
        assert_eq!(next.counters.target, 120);
        assert_eq!(next.counters.fetched, 0);
        assert_eq!(next.counters.download_total, 0);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let previous = Progress::placeholder(JobKind::Analysis);
        assert!(normalize(&previous, &json!("analyzing")).is_none());
        assert!(normalize(&previous, &Value::Null).is_none());
    }

    #[test]
    fn error_phase_remembers_where_it_failed() {
        let previous = Progress::Fetch(FetchProgress {
            phase: FetchPhase::Downloading,
            ..FetchProgress::default()
        });
        let next = normalize(&previous, &json!({ "phase": "error", "message": "quota" })).unwrap();
        let Progress::Fetch(next) = next else {
            panic!("kind changed");
        };
        assert_eq!(next.failed_during, Some(FetchPhase::Downloading));
        assert_eq!(
            next.phase_statuses(),
            [StepStatus::Done, StepStatus::Done, StepStatus::Error]
        );
    }

    #[test]
    fn analysis_steps_ignore_unknown_keys_and_regressions() {
        let mut prev = AnalysisProgress::default();
        prev.steps[0] = StepStatus::Done;
        let next = normalize(
            &Progress::Analysis(prev),
            &json!({
                "status": "analyzing",
                "steps": { "upload": "pending", "full_analysis": "running", "thumbnail": "done" }
            }),
        )
        .unwrap();
        let Progress::Analysis(next) = next else {
            panic!("kind changed");
        };
        assert_eq!(next.status, AnalysisStatus::Analyzing);
        assert_eq!(next.step(AnalysisStep::Upload), StepStatus::Done);
        assert_eq!(next.step(AnalysisStep::FullAnalysis), StepStatus::Running);
    }

    #[test]
    fn analysis_error_without_message_gets_default() {
        let next = normalize(
            &Progress::placeholder(JobKind::Analysis),
            &json!({ "status": "error" }),
        )
        .unwrap();
        assert_eq!(next.message(), Some(DEFAULT_ANALYSIS_ERROR));
    }
}
