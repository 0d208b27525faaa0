use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulse_core::{JobId, JobKind, Lifecycle, StepStatus};
use pulse_engine::{
    Delivery, HttpStatusFetcher, JobSubmitter, JobTracker, PollSettings, PollTransport,
    SnapshotSink, StatusFetcher, SubmitError, SubmitRequest, TrackerSettings, Transport,
    TransportError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct TestSink {
    deliveries: Mutex<Vec<Delivery>>,
    errors: Mutex<Vec<TransportError>>,
}

impl TestSink {
    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<TransportError> {
        self.errors.lock().unwrap().clone()
    }
}

impl SnapshotSink for TestSink {
    fn snapshot(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }

    fn transport_error(&self, _job_id: &JobId, _epoch: u64, error: TransportError) {
        self.errors.lock().unwrap().push(error);
    }
}

fn settings_for(server: &MockServer, interval_ms: u64) -> PollSettings {
    PollSettings {
        base_url: server.uri(),
        status_path: "/api/analysis/{id}/status".to_string(),
        interval_ms,
        request_timeout_ms: 200,
    }
}

#[tokio::test]
async fn fetcher_returns_status_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/42/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "analyzing",
            "steps": { "upload": "done" }
        })))
        .mount(&server)
        .await;

    let fetcher = HttpStatusFetcher::new(settings_for(&server, 1_000)).expect("client");
    let value = fetcher.fetch_status(&JobId::Numeric(42)).await.expect("status");
    assert_eq!(value["status"], "analyzing");
}

#[tokio::test]
async fn fetcher_maps_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/1/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/2/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/3/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({})),
        )
        .mount(&server)
        .await;

    let fetcher = HttpStatusFetcher::new(settings_for(&server, 1_000)).expect("client");
    assert_eq!(
        fetcher.fetch_status(&JobId::Numeric(1)).await.unwrap_err(),
        TransportError::HttpStatus(503)
    );
    assert!(matches!(
        fetcher.fetch_status(&JobId::Numeric(2)).await.unwrap_err(),
        TransportError::Malformed(_)
    ));
    assert_eq!(
        fetcher.fetch_status(&JobId::Numeric(3)).await.unwrap_err(),
        TransportError::Timeout
    );
}

#[tokio::test]
async fn poll_fetches_immediately_then_on_interval_with_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/7/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "analyzing" })))
        .mount(&server)
        .await;

    let transport = PollTransport::http(settings_for(&server, 100)).expect("client");
    let sink = Arc::new(TestSink::default());
    let mut handle = transport.start(&JobId::Numeric(7), 3, sink.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.deliveries().len(), 1, "first fetch is immediate");

    tokio::time::sleep(Duration::from_millis(280)).await;
    handle.stop();
    let deliveries = sink.deliveries();
    assert!(deliveries.len() >= 3);
    let seqs: Vec<_> = deliveries.iter().map(|d| d.seq.unwrap()).collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(deliveries.iter().all(|d| d.epoch == 3));

    let count = deliveries.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(sink.deliveries().len(), count, "no delivery after stop");
}

#[tokio::test]
async fn poll_failures_are_reported_and_polling_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/8/status"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/8/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "pending" })))
        .mount(&server)
        .await;

    let transport = PollTransport::http(settings_for(&server, 30)).expect("client");
    let sink = Arc::new(TestSink::default());
    let _handle = transport.start(&JobId::Numeric(8), 1, sink.clone());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(sink.errors(), vec![TransportError::HttpStatus(500)]);
    assert!(!sink.deliveries().is_empty());
    assert_eq!(sink.deliveries()[0].seq, Some(2));
}

#[tokio::test]
async fn slow_responses_never_overlap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/9/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(json!({ "status": "analyzing" })),
        )
        .mount(&server)
        .await;

    let transport = PollTransport::http(settings_for(&server, 20)).expect("client");
    let sink = Arc::new(TestSink::default());
    let mut handle = transport.start(&JobId::Numeric(9), 1, sink.clone());

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.stop();

    // Back to back at 150ms each fits four requests; overlapping polls at a
    // 20ms interval would have sent about 25.
    let requests = server.received_requests().await.unwrap().len();
    assert!((2..=5).contains(&requests), "{requests} requests sent");
    assert!(sink.errors().is_empty());
    let seqs: Vec<_> = sink.deliveries().iter().map(|d| d.seq.unwrap()).collect();
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
}

struct NoSubmit;

#[async_trait::async_trait]
impl JobSubmitter for NoSubmit {
    async fn submit(&self, _request: &SubmitRequest) -> Result<JobId, SubmitError> {
        Err(SubmitError::MissingJobId)
    }

    async fn resubmit(&self, _previous: &JobId) -> Result<JobId, SubmitError> {
        Err(SubmitError::MissingJobId)
    }
}

#[tokio::test]
async fn tracker_polls_until_completed_then_stops() {
    pulse_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/55/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "analyzing",
            "steps": { "upload": "done", "full_analysis": "running" }
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/analysis/55/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "steps": {
                "upload": "done", "full_analysis": "done", "hook_analysis": "done",
                "virality_scores": "done", "improvement": "done"
            }
        })))
        .mount(&server)
        .await;

    let transport = Arc::new(PollTransport::http(settings_for(&server, 25)).expect("client"));
    let tracker = JobTracker::new(
        JobKind::Analysis,
        transport,
        Arc::new(NoSubmit),
        TrackerSettings::default(),
    );
    let mut rx = tracker.subscribe();
    tracker.begin(JobId::Numeric(55));

    let view = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = rx.borrow_and_update().clone();
            if view.lifecycle == Lifecycle::Done {
                return view;
            }
            rx.changed().await.expect("tracker alive");
        }
    })
    .await
    .expect("job completes");
    assert_eq!(view.percent, 100);
    assert_eq!(view.step_status("improvement"), Some(StepStatus::Done));

    let requests = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), requests);
}
