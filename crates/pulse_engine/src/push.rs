//! Push transport over one shared WebSocket connection.
//!
//! The connection is opened lazily by the first subscription and then kept
//! for the life of the process, reconnecting with capped backoff. Trackers
//! only attach and detach listeners, scoped by room (the job's entity id).
//!
//! Frames sent: `{"type":"join","room":"42"}` and `{"type":"leave","room":"42"}`.
//! Frames received: `{"event":"fetch-progress","room":"42","data":{...}}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pulse_core::JobId;
use pulse_logging::{pulse_debug, pulse_info, pulse_warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::settings::PushSettings;
use crate::transport::{Delivery, GuardedSink, SnapshotSink, Transport, TransportHandle};
use crate::TransportError;

static GLOBAL: OnceLock<Arc<PushConnection>> = OnceLock::new();

struct Listener {
    id: u64,
    job_id: JobId,
    epoch: u64,
    sink: Arc<GuardedSink>,
}

#[derive(Default)]
struct Rooms {
    by_room: HashMap<String, Vec<Listener>>,
    next_listener: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

pub struct PushConnection {
    settings: PushSettings,
    rooms: Mutex<Rooms>,
}

impl PushConnection {
    /// A connection owned by the caller. Nothing is opened until the first
    /// subscription.
    pub fn new(settings: PushSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            rooms: Mutex::new(Rooms::default()),
        })
    }

    /// The process-wide connection. The first caller's settings win.
    pub fn global(settings: PushSettings) -> Arc<Self> {
        GLOBAL.get_or_init(|| Self::new(settings)).clone()
    }

    /// Registers `sink` for `job_id`'s room and joins the room on the server
    /// if this is its first listener.
    pub fn subscribe(
        self: &Arc<Self>,
        job_id: &JobId,
        epoch: u64,
        sink: Arc<dyn SnapshotSink>,
    ) -> TransportHandle {
        let room = job_id.to_string();
        let token = CancellationToken::new();
        let guarded = Arc::new(GuardedSink::new(sink, token.clone()));

        let listener_id = {
            let mut rooms = self.lock_rooms();
            let outbound = self.ensure_driver(&mut rooms);
            rooms.next_listener += 1;
            let id = rooms.next_listener;
            let listeners = rooms.by_room.entry(room.clone()).or_default();
            let first = listeners.is_empty();
            listeners.push(Listener {
                id,
                job_id: job_id.clone(),
                epoch,
                sink: guarded,
            });
            if first {
                let _ = outbound.send(join_frame(&room));
            }
            id
        };
        pulse_debug!("push subscribe room={} listener={}", room, listener_id);

        let connection = Arc::downgrade(self);
        TransportHandle::with_cleanup(token, move || {
            if let Some(connection) = connection.upgrade() {
                connection.unsubscribe(&room, listener_id);
            }
        })
    }

    /// Number of live listeners for a room.
    pub fn listener_count(&self, room: &str) -> usize {
        self.lock_rooms()
            .by_room
            .get(room)
            .map_or(0, |listeners| listeners.len())
    }

    pub fn active_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.lock_rooms().by_room.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    fn unsubscribe(&self, room: &str, listener_id: u64) {
        let mut rooms = self.lock_rooms();
        let Some(listeners) = rooms.by_room.get_mut(room) else {
            return;
        };
        listeners.retain(|listener| listener.id != listener_id);
        if listeners.is_empty() {
            rooms.by_room.remove(room);
            if let Some(outbound) = &rooms.outbound {
                let _ = outbound.send(leave_frame(room));
            }
        }
        pulse_debug!("push unsubscribe room={} listener={}", room, listener_id);
    }

    /// Routes one inbound text frame to the listeners of its room.
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                pulse_warn!("push frame is not JSON: {}", err);
                return;
            }
        };
        if frame.get("event").and_then(Value::as_str) != Some(self.settings.event.as_str()) {
            return;
        }
        let Some(room) = frame.get("room").and_then(room_key) else {
            pulse_warn!("push event without room ignored");
            return;
        };
        let payload = frame.get("data").cloned().unwrap_or(Value::Null);

        // Deliver outside the lock so sinks may unsubscribe.
        let targets: Vec<(JobId, u64, Arc<GuardedSink>)> = {
            let rooms = self.lock_rooms();
            match rooms.by_room.get(&room) {
                Some(listeners) => listeners
                    .iter()
                    .map(|l| (l.job_id.clone(), l.epoch, l.sink.clone()))
                    .collect(),
                None => return,
            }
        };
        for (job_id, epoch, sink) in targets {
            sink.snapshot(Delivery {
                job_id,
                epoch,
                seq: None,
                payload: payload.clone(),
            });
        }
    }

    fn notify_transport_error(&self, error: &TransportError) {
        let targets: Vec<(JobId, u64, Arc<GuardedSink>)> = self
            .lock_rooms()
            .by_room
            .values()
            .flatten()
            .map(|l| (l.job_id.clone(), l.epoch, l.sink.clone()))
            .collect();
        for (job_id, epoch, sink) in targets {
            sink.transport_error(&job_id, epoch, error.clone());
        }
    }

    fn ensure_driver(self: &Arc<Self>, rooms: &mut Rooms) -> mpsc::UnboundedSender<String> {
        if let Some(outbound) = &rooms.outbound {
            return outbound.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.outbound = Some(tx.clone());
        pulse_info!("push connection starting url={}", self.settings.url);
        tokio::spawn(drive(Arc::downgrade(self), rx));
        tx
    }

    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, Rooms> {
        // A panic while holding the lock leaves the map itself consistent.
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Push transport for fetch jobs; each job id is its own room.
pub struct PushTransport {
    connection: Arc<PushConnection>,
}

impl PushTransport {
    pub fn new(connection: Arc<PushConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<PushConnection> {
        &self.connection
    }
}

impl Transport for PushTransport {
    fn start(&self, job_id: &JobId, epoch: u64, sink: Arc<dyn SnapshotSink>) -> TransportHandle {
        self.connection.subscribe(job_id, epoch, sink)
    }
}

pub(crate) fn join_frame(room: &str) -> String {
    json!({ "type": "join", "room": room }).to_string()
}

pub(crate) fn leave_frame(room: &str) -> String {
    json!({ "type": "leave", "room": room }).to_string()
}

fn room_key(value: &Value) -> Option<String> {
    JobId::from_json(value).map(|id| id.to_string())
}

async fn drive(connection: Weak<PushConnection>, mut outbound: mpsc::UnboundedReceiver<String>) {
    let Some(settings) = connection.upgrade().map(|c| c.settings.clone()) else {
        return;
    };
    let mut backoff = settings.initial_reconnect_delay();

    loop {
        match run_session(&connection, &settings.url, &mut outbound).await {
            Ok(SessionEnd::Dropped) => {
                pulse_info!("push connection closed by server");
                backoff = settings.initial_reconnect_delay();
            }
            Ok(SessionEnd::Shutdown) => return,
            Err(err) => {
                pulse_warn!(
                    "push connection failed: {} (retrying in {:?})",
                    err,
                    backoff
                );
                match connection.upgrade() {
                    Some(conn) => conn.notify_transport_error(&err),
                    None => return,
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, settings.max_reconnect_delay());
    }
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

async fn run_session(
    connection: &Weak<PushConnection>,
    url: &str,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Result<SessionEnd, TransportError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|err| TransportError::Network(err.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    // Frames queued while disconnected are superseded by a fresh join of
    // every room that still has listeners.
    while outbound.try_recv().is_ok() {}
    let rooms = match connection.upgrade() {
        Some(conn) => conn.active_rooms(),
        None => return Ok(SessionEnd::Shutdown),
    };
    for room in &rooms {
        sink.send(Message::Text(join_frame(room).into()))
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
    }
    pulse_info!("push connected, joined {} room(s)", rooms.len());

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::Shutdown);
                };
                sink.send(Message::Text(frame.into()))
                    .await
                    .map_err(|err| TransportError::Network(err.to_string()))?;
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match connection.upgrade() {
                        Some(conn) => conn.dispatch(text.as_str()),
                        None => return Ok(SessionEnd::Shutdown),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                    Some(Err(err)) => return Err(TransportError::Network(err.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
