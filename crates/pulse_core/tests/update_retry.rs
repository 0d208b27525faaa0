use pretty_assertions::assert_eq;
use pulse_core::{update, Effect, JobId, JobKind, Lifecycle, Msg, StepStatus, TrackerState};
use serde_json::{json, Value};

fn deliver(state: TrackerState, payload: Value) -> (TrackerState, Vec<Effect>) {
    let job_id = state.job_id().cloned().expect("tracking a job");
    let epoch = state.epoch();
    update(
        state,
        Msg::Snapshot {
            job_id,
            epoch,
            seq: None,
            payload,
        },
    )
}

fn failed_analysis() -> TrackerState {
    pulse_logging::initialize_for_tests();
    let (state, _) = update(
        TrackerState::new(JobKind::Analysis),
        Msg::Begin {
            job_id: JobId::Numeric(300),
        },
    );
    let (state, _) = deliver(
        state,
        json!({ "status": "analyzing", "steps": { "upload": "done", "full_analysis": "running" } }),
    );
    let (state, _) = deliver(
        state,
        json!({
            "status": "error",
            "steps": { "upload": "done", "full_analysis": "error" },
            "error": "Model quota exceeded"
        }),
    );
    state
}

#[test]
fn five_step_stepper_reports_each_status() {
    let (state, _) = update(
        TrackerState::new(JobKind::Analysis),
        Msg::Begin {
            job_id: JobId::Numeric(1),
        },
    );
    let (state, _) = deliver(
        state,
        json!({
            "status": "analyzing",
            "steps": {
                "upload": "done",
                "full_analysis": "done",
                "hook_analysis": "running",
                "virality_scores": "pending",
                "improvement": "pending"
            }
        }),
    );

    let view = state.view();
    let statuses: Vec<_> = view.steps.iter().map(|step| (step.key, step.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("upload", StepStatus::Done),
            ("full_analysis", StepStatus::Done),
            ("hook_analysis", StepStatus::Running),
            ("virality_scores", StepStatus::Pending),
            ("improvement", StepStatus::Pending),
        ]
    );
}

#[test]
fn retry_is_only_offered_from_error() {
    let (state, _) = update(
        TrackerState::new(JobKind::Analysis),
        Msg::Begin {
            job_id: JobId::Numeric(1),
        },
    );
    let (state, effects) = update(state, Msg::RetryRequested);
    assert!(effects.is_empty());
    assert_eq!(state.lifecycle(), Lifecycle::Active);
    assert!(!state.view().can_retry);
}

#[test]
fn retry_requests_resubmission_once() {
    let state = failed_analysis();
    assert_eq!(state.view().message.as_deref(), Some("Model quota exceeded"));

    let (state, effects) = update(state, Msg::RetryRequested);
    assert_eq!(
        effects,
        vec![Effect::Resubmit {
            previous: JobId::Numeric(300)
        }]
    );
    assert!(!state.view().can_retry);

    let (_, effects) = update(state, Msg::RetryRequested);
    assert!(effects.is_empty());
}

#[test]
fn retry_keeps_completed_steps() {
    let (state, _) = update(failed_analysis(), Msg::RetryRequested);
    let (state, effects) = update(
        state,
        Msg::Resubmitted {
            job_id: JobId::Numeric(301),
        },
    );

    assert!(effects.contains(&Effect::StartTransport {
        job_id: JobId::Numeric(301),
        epoch: state.epoch()
    }));
    let view = state.view();
    assert_eq!(view.lifecycle, Lifecycle::Active);
    assert_eq!(view.job_id, Some(JobId::Numeric(301)));
    assert_eq!(view.message, None);
    assert_eq!(view.step_status("upload"), Some(StepStatus::Done));
    assert_eq!(view.step_status("full_analysis"), Some(StepStatus::Pending));
    assert_eq!(view.step_status("hook_analysis"), Some(StepStatus::Pending));
    assert_eq!(view.percent, 20);
}

#[test]
fn retry_on_same_id_resumes_tracking() {
    let (state, _) = update(failed_analysis(), Msg::RetryRequested);
    let old_epoch = state.epoch();
    let (state, effects) = update(
        state,
        Msg::Resubmitted {
            job_id: JobId::Numeric(300),
        },
    );

    assert_eq!(state.epoch(), old_epoch + 1);
    assert_eq!(
        effects[0],
        Effect::StartTransport {
            job_id: JobId::Numeric(300),
            epoch: old_epoch + 1
        }
    );
}

#[test]
fn retried_job_can_complete_and_notify() {
    let (state, _) = update(failed_analysis(), Msg::RetryRequested);
    let (state, _) = update(
        state,
        Msg::Resubmitted {
            job_id: JobId::Numeric(300),
        },
    );
    let (state, effects) = deliver(
        state,
        json!({ "status": "completed", "steps": {
            "upload": "done", "full_analysis": "done", "hook_analysis": "done",
            "virality_scores": "done", "improvement": "done"
        } }),
    );

    assert!(effects.contains(&Effect::NotifyComplete {
        job_id: JobId::Numeric(300)
    }));
    assert_eq!(state.view().percent, 100);
}

#[test]
fn failed_resubmission_leaves_job_retryable() {
    let (state, _) = update(failed_analysis(), Msg::RetryRequested);
    let (state, effects) = update(
        state,
        Msg::ResubmitFailed {
            reason: "401 Unauthorized".into(),
        },
    );

    assert!(effects.is_empty());
    assert_eq!(state.lifecycle(), Lifecycle::Error);
    assert!(state.view().can_retry);
    assert_eq!(state.view().message.as_deref(), Some("Model quota exceeded"));
}

#[test]
fn resubmitted_outside_error_is_ignored() {
    let (state, _) = update(
        TrackerState::new(JobKind::Fetch),
        Msg::Begin {
            job_id: JobId::Numeric(8),
        },
    );
    let (next, effects) = update(
        state.clone(),
        Msg::Resubmitted {
            job_id: JobId::Numeric(9),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(next, state);
}

#[test]
fn resubmitted_without_pending_retry_is_ignored() {
    let failed = failed_analysis();
    let (next, effects) = update(
        failed.clone(),
        Msg::Resubmitted {
            job_id: JobId::Numeric(301),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(next, failed);
}

#[test]
fn resubmitted_after_end_is_ignored() {
    let (state, _) = update(failed_analysis(), Msg::RetryRequested);
    let (state, _) = update(state, Msg::End);
    let (next, effects) = update(
        state.clone(),
        Msg::Resubmitted {
            job_id: JobId::Numeric(301),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(next.lifecycle(), Lifecycle::Idle);
    assert_eq!(next.job_id(), None);
}
