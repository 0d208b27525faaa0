use std::sync::Arc;

use anyhow::{bail, Context};
use pulse_core::{JobId, JobKind, JobView, Lifecycle};
use pulse_engine::{
    HttpJobSubmitter, JobTracker, PollTransport, PushConnection, PushTransport, SubmitRequest,
    TrackerSettings, Transport,
};
use pulse_logging::{pulse_info, pulse_warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::render::render;

/// How the tracked job comes into existence.
#[derive(Debug, Clone, PartialEq)]
pub enum Start {
    Existing(JobId),
    Submit(SubmitRequest),
}

impl Start {
    pub fn from_args(
        existing: Option<&str>,
        submit: Option<&str>,
        options: &[(String, String)],
    ) -> anyhow::Result<Self> {
        if let Some(url) = submit {
            let request = options
                .iter()
                .fold(SubmitRequest::new(url), |request, (key, value)| {
                    request.with_option(key.as_str(), value.as_str())
                });
            return Ok(Self::Submit(request));
        }
        match existing.and_then(JobId::parse) {
            Some(job_id) => Ok(Self::Existing(job_id)),
            None => bail!("a job id or a URL to submit is required"),
        }
    }
}

pub fn build_tracker(kind: JobKind, settings: &TrackerSettings) -> anyhow::Result<JobTracker> {
    let transport: Arc<dyn Transport> = match kind {
        JobKind::Analysis => Arc::new(
            PollTransport::http(settings.poll.clone()).context("building the status client")?,
        ),
        JobKind::Fetch => Arc::new(PushTransport::new(PushConnection::global(
            settings.push.clone(),
        ))),
    };
    let submitter = HttpJobSubmitter::new(settings.submit.clone(), kind)
        .context("building the submission client")?;
    Ok(JobTracker::new(
        kind,
        transport,
        Arc::new(submitter),
        settings.clone(),
    ))
}

/// Follows one job until it finishes, is dismissed, or the user interrupts.
///
/// Reads `r` (retry) and `q` (dismiss) from stdin. Returns an error when the
/// job ends failed and nobody is left to retry it.
pub async fn watch(kind: JobKind, start: Start, settings: &TrackerSettings) -> anyhow::Result<()> {
    let tracker = build_tracker(kind, settings)?;
    tracker.on_complete(|job_id| pulse_info!("Job {} completed", job_id));
    let mut views = tracker.subscribe();

    let job_id = match start {
        Start::Existing(job_id) => {
            tracker.begin(job_id.clone());
            job_id
        }
        Start::Submit(request) => tracker
            .submit(&request)
            .await
            .with_context(|| format!("submitting {}", request.url))?,
    };
    pulse_info!("Watching {:?} job {}", kind, job_id);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last = views.borrow_and_update().clone();
    show(&last);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                last = views.borrow_and_update().clone();
                show(&last);
                if last.lifecycle == Lifecycle::Done {
                    return Ok(());
                }
                if last.lifecycle == Lifecycle::Error && !stdin_open {
                    break;
                }
            }
            line = input.next_line(), if stdin_open => {
                match line.context("reading stdin")? {
                    Some(line) => match line.trim() {
                        "r" => match tracker.retry().await {
                            Ok(job_id) => println!("Retrying as job {job_id}"),
                            Err(err) => {
                                pulse_warn!("Retry failed: {}", err);
                                println!("Retry failed: {err}");
                            }
                        },
                        "q" => {
                            tracker.dismiss();
                            println!("Dismissed");
                            return Ok(());
                        }
                        "" => {}
                        other => println!("Unknown command `{other}` (r: retry, q: dismiss)"),
                    },
                    None => {
                        stdin_open = false;
                        if last.lifecycle == Lifecycle::Error {
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracker.end();
                println!("Interrupted");
                return Ok(());
            }
        }
    }

    match last.lifecycle {
        Lifecycle::Error => bail!(
            "job {} failed: {}",
            last.job_id.as_ref().unwrap_or(&job_id),
            last.message.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}

fn show(view: &JobView) {
    println!("{}\n", render(view));
}
