use std::sync::{Arc, Mutex, MutexGuard, Weak};

use pulse_core::{update, Effect, JobId, JobKind, JobView, Msg, TrackerState};
use pulse_logging::{pulse_debug, pulse_info, pulse_warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::settings::TrackerSettings;
use crate::submit::{JobSubmitter, SubmitRequest};
use crate::transport::{ChannelSink, Transport, TransportHandle};
use crate::SubmitError;

type CompletionCallback = Box<dyn FnMut(&JobId) + Send>;

struct Subscription {
    epoch: u64,
    handle: TransportHandle,
}

struct Slot {
    state: TrackerState,
    subscription: Option<Subscription>,
    deadline: Option<JoinHandle<()>>,
}

struct Shared {
    slot: Mutex<Slot>,
    on_complete: Mutex<Option<CompletionCallback>>,
    transport: Arc<dyn Transport>,
    submitter: Arc<dyn JobSubmitter>,
    settings: TrackerSettings,
    msg_tx: mpsc::UnboundedSender<Msg>,
    view_tx: watch::Sender<JobView>,
}

/// Tracks one job at a time: drives the pure tracker state with transport
/// deliveries and executes the effects it asks for.
///
/// Must be created inside a tokio runtime. Dropping the tracker tears the
/// transport down.
pub struct JobTracker {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl JobTracker {
    pub fn new(
        kind: JobKind,
        transport: Arc<dyn Transport>,
        submitter: Arc<dyn JobSubmitter>,
        settings: TrackerSettings,
    ) -> Self {
        let state = TrackerState::new(kind)
            .with_weights(settings.weights)
            .with_error_percent(settings.error_percent);
        let (view_tx, _) = watch::channel(state.view());
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                state,
                subscription: None,
                deadline: None,
            }),
            on_complete: Mutex::new(None),
            transport,
            submitter,
            settings,
            msg_tx,
            view_tx,
        });
        let pump = tokio::spawn(pump(Arc::downgrade(&shared), msg_rx));
        Self { shared, pump }
    }

    /// Registers the callback fired the first time the tracked job is done.
    ///
    /// The callback never runs after `end` has returned. It must not call back
    /// into the tracker's `end`, `dismiss` or `on_complete`.
    pub fn on_complete(&self, callback: impl FnMut(&JobId) + Send + 'static) {
        *lock(&self.shared.on_complete) = Some(Box::new(callback));
    }

    /// Starts the job on the server, then tracks it. Submission failures are
    /// returned as-is and leave the tracker untouched.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<JobId, SubmitError> {
        let job_id = self.shared.submitter.submit(request).await?;
        self.begin(job_id.clone());
        Ok(job_id)
    }

    pub fn begin(&self, job_id: impl Into<JobId>) {
        self.shared.dispatch(Msg::Begin {
            job_id: job_id.into(),
        });
    }

    /// Re-submits a failed job and resumes tracking the id the server returns.
    pub async fn retry(&self) -> Result<JobId, SubmitError> {
        let effects = self.shared.dispatch(Msg::RetryRequested);
        let Some(previous) = effects.into_iter().find_map(|effect| match effect {
            Effect::Resubmit { previous } => Some(previous),
            _ => None,
        }) else {
            return Err(SubmitError::NotRetryable);
        };

        match self.shared.submitter.resubmit(&previous).await {
            Ok(job_id) => {
                let effects = self.shared.dispatch(Msg::Resubmitted {
                    job_id: job_id.clone(),
                });
                let tracking = effects
                    .iter()
                    .any(|effect| matches!(effect, Effect::StartTransport { .. }));
                if !tracking {
                    pulse_warn!(
                        "retry of job={} accepted as job={} but tracking had moved on",
                        previous,
                        job_id
                    );
                    return Err(SubmitError::Superseded { job_id });
                }
                Ok(job_id)
            }
            Err(err) => {
                pulse_warn!("retry of job={} failed: {}", previous, err);
                self.shared.dispatch(Msg::ResubmitFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Stops tracking and releases the job record.
    pub fn end(&self) {
        self.shared.end();
    }

    pub fn dismiss(&self) {
        self.end();
    }

    pub fn view(&self) -> JobView {
        self.shared.view_tx.borrow().clone()
    }

    /// Receives a new view every time the tracked state changes.
    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.shared.view_tx.subscribe()
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.shared.end();
        self.pump.abort();
    }
}

impl Shared {
    /// Applies `msg` and runs its effects. Returns the effects so callers can
    /// act on the ones addressed to them.
    fn dispatch(self: &Arc<Self>, msg: Msg) -> Vec<Effect> {
        if let Msg::TransportFailed { job_id, reason, .. } = &msg {
            pulse_debug!("transport for job={} reported: {}", job_id, reason);
        }

        let mut slot = lock(&self.slot);
        let state = std::mem::take(&mut slot.state);
        let (mut state, effects) = update(state, msg);
        if state.consume_dirty() {
            self.view_tx.send_replace(state.view());
        }
        slot.state = state;
        for effect in &effects {
            self.run_effect(&mut slot, effect);
        }

        // The callback lock is taken before the slot is released, so an `end`
        // that follows cannot return until the callback has run.
        let completed = effects.iter().find_map(|effect| match effect {
            Effect::NotifyComplete { job_id } => Some(job_id.clone()),
            _ => None,
        });
        let callback = completed.as_ref().map(|_| lock(&self.on_complete));
        drop(slot);

        if let (Some(job_id), Some(mut callback)) = (completed, callback) {
            if let Some(callback) = callback.as_mut() {
                callback(&job_id);
            }
        }
        effects
    }

    /// Ends tracking and waits out a completion callback already under way.
    fn end(self: &Arc<Self>) {
        self.dispatch(Msg::End);
        drop(lock(&self.on_complete));
    }

    fn run_effect(self: &Arc<Self>, slot: &mut Slot, effect: &Effect) {
        match effect {
            Effect::StartTransport { job_id, epoch } => {
                pulse_info!("tracking job={} epoch={}", job_id, epoch);
                let sink = Arc::new(ChannelSink::new(self.msg_tx.clone()));
                let handle = self.transport.start(job_id, *epoch, sink);
                if let Some(mut previous) = slot.subscription.replace(Subscription {
                    epoch: *epoch,
                    handle,
                }) {
                    previous.handle.stop();
                }
            }
            Effect::StopTransport { job_id, epoch } => {
                if slot.subscription.as_ref().map(|s| s.epoch) == Some(*epoch) {
                    if let Some(mut subscription) = slot.subscription.take() {
                        subscription.handle.stop();
                    }
                    pulse_debug!("stopped transport for job={} epoch={}", job_id, epoch);
                }
                if let Some(deadline) = slot.deadline.take() {
                    deadline.abort();
                }
            }
            Effect::ArmDeadline { job_id, epoch } => {
                if let Some(previous) = slot.deadline.take() {
                    previous.abort();
                }
                if let Some(limit) = self.settings.max_duration() {
                    let tx = self.msg_tx.clone();
                    let job_id = job_id.clone();
                    let epoch = *epoch;
                    slot.deadline = Some(tokio::spawn(async move {
                        tokio::time::sleep(limit).await;
                        let _ = tx.send(Msg::DeadlineElapsed { job_id, epoch });
                    }));
                }
            }
            Effect::NotifyComplete { job_id } => {
                pulse_info!("job={} done", job_id);
            }
            Effect::NotifyFailed { job_id, message } => {
                pulse_warn!("job={} failed: {}", job_id, message);
            }
            // Carried out by `JobTracker::retry`.
            Effect::Resubmit { .. } => {}
        }
    }
}

async fn pump(shared: Weak<Shared>, mut msg_rx: mpsc::UnboundedReceiver<Msg>) {
    while let Some(msg) = msg_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.dispatch(msg);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
