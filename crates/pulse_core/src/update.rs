use serde_json::Value;

use crate::snapshot::normalize;
use crate::state::{JobRecord, Lifecycle, Progress};
use crate::weights::{compute_overall_percent, ErrorPercent};
use crate::{Effect, JobId, Msg, TrackerState};

const TIMED_OUT_MESSAGE: &str = "Timed out waiting for the job to finish";

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: TrackerState, msg: Msg) -> (TrackerState, Vec<Effect>) {
    let effects = match msg {
        Msg::Begin { job_id } => begin(&mut state, job_id, None),
        Msg::Snapshot {
            job_id,
            epoch,
            seq,
            payload,
        } => apply_snapshot(&mut state, &job_id, epoch, seq, &payload),
        Msg::RetryRequested => {
            if state.lifecycle() != Lifecycle::Error || state.retry_pending() {
                return (state, Vec::new());
            }
            let Some(previous) = state.job_id().cloned() else {
                return (state, Vec::new());
            };
            state.set_retry_pending(true);
            state.mark_dirty();
            vec![Effect::Resubmit { previous }]
        }
        Msg::Resubmitted { job_id } => {
            if state.lifecycle() != Lifecycle::Error || !state.retry_pending() {
                return (state, Vec::new());
            }
            let baseline = state
                .record()
                .map(|record| record.progress().retry_baseline());
            state.set_retry_pending(false);
            begin(&mut state, job_id, baseline)
        }
        Msg::ResubmitFailed { .. } => {
            if state.retry_pending() {
                state.set_retry_pending(false);
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::DeadlineElapsed { job_id, epoch } => time_out(&mut state, &job_id, epoch),
        Msg::End => end(&mut state),
        Msg::TransportFailed { .. } | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn begin(state: &mut TrackerState, job_id: JobId, baseline: Option<Progress>) -> Vec<Effect> {
    let already_active = state.lifecycle() == Lifecycle::Active
        && state.job_id() == Some(&job_id);
    if already_active {
        return Vec::new();
    }

    let mut effects = Vec::with_capacity(3);
    if let Some(stop) = stop_active(state) {
        effects.push(stop);
    }

    let progress = baseline.unwrap_or_else(|| Progress::placeholder(state.kind()));
    let record = JobRecord::new(job_id.clone(), progress, state.weights());
    state.replace_record(Some(record));
    state.set_lifecycle(Lifecycle::Active);
    state.set_retry_pending(false);
    let epoch = state.next_epoch();
    state.mark_dirty();

    effects.push(Effect::StartTransport {
        job_id: job_id.clone(),
        epoch,
    });
    effects.push(Effect::ArmDeadline { job_id, epoch });
    effects
}

fn apply_snapshot(
    state: &mut TrackerState,
    job_id: &JobId,
    epoch: u64,
    seq: Option<u64>,
    payload: &Value,
) -> Vec<Effect> {
    if state.lifecycle() != Lifecycle::Active || epoch != state.epoch() {
        return Vec::new();
    }
    let weights = *state.weights();
    let error_percent = state.error_percent();
    let Some(record) = state.record_mut() else {
        return Vec::new();
    };
    if &record.job_id != job_id {
        return Vec::new();
    }
    if let (Some(seq), Some(last)) = (seq, record.last_seq) {
        if seq <= last {
            return Vec::new();
        }
    }
    let Some(next) = normalize(&record.progress, payload) else {
        return Vec::new();
    };
    if !next.is_error() && next.ordinal() < record.progress.ordinal() {
        return Vec::new();
    }

    if seq.is_some() {
        record.last_seq = seq;
    }
    let computed = compute_overall_percent(&next, &weights);
    record.percent = if next.is_done() {
        100
    } else if next.is_error() {
        match error_percent {
            ErrorPercent::Reset => computed,
            ErrorPercent::HoldLast => record.percent,
        }
    } else {
        record.percent.max(computed)
    };
    let changed = record.progress != next;
    record.progress = next;

    let mut effects = Vec::new();
    if record.progress.is_terminal() {
        let job_id = record.job_id.clone();
        let lifecycle = if record.progress.is_done() {
            if !record.completion_notified {
                record.completion_notified = true;
                effects.push(Effect::NotifyComplete {
                    job_id: job_id.clone(),
                });
            }
            Lifecycle::Done
        } else {
            effects.push(Effect::NotifyFailed {
                job_id: job_id.clone(),
                message: record.progress.message().unwrap_or_default().to_string(),
            });
            Lifecycle::Error
        };
        effects.insert(0, Effect::StopTransport { job_id, epoch });
        state.set_lifecycle(lifecycle);
        state.mark_dirty();
    } else if changed {
        state.mark_dirty();
    }
    effects
}

fn time_out(state: &mut TrackerState, job_id: &JobId, epoch: u64) -> Vec<Effect> {
    if state.lifecycle() != Lifecycle::Active
        || epoch != state.epoch()
        || state.job_id() != Some(job_id)
    {
        return Vec::new();
    }
    let error_percent = state.error_percent();
    let Some(record) = state.record_mut() else {
        return Vec::new();
    };
    record.progress.force_error(TIMED_OUT_MESSAGE);
    if error_percent == ErrorPercent::Reset {
        record.percent = 0;
    }
    state.set_lifecycle(Lifecycle::Error);
    state.mark_dirty();
    vec![
        Effect::StopTransport {
            job_id: job_id.clone(),
            epoch,
        },
        Effect::NotifyFailed {
            job_id: job_id.clone(),
            message: TIMED_OUT_MESSAGE.to_string(),
        },
    ]
}

fn end(state: &mut TrackerState) -> Vec<Effect> {
    let stop = stop_active(state);
    let had_record = state.replace_record(None).is_some();
    // Invalidate anything still in flight for the released record.
    state.next_epoch();
    state.set_lifecycle(Lifecycle::Idle);
    state.set_retry_pending(false);
    if had_record {
        state.mark_dirty();
    }
    stop.into_iter().collect()
}

/// Stop effect for the currently running transport, if any.
fn stop_active(state: &TrackerState) -> Option<Effect> {
    if state.lifecycle() != Lifecycle::Active {
        return None;
    }
    state.job_id().map(|job_id| Effect::StopTransport {
        job_id: job_id.clone(),
        epoch: state.epoch(),
    })
}
