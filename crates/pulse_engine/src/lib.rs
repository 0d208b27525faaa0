//! Jobpulse engine: transports, job submission, and the tracker runtime.
mod poll;
mod push;
mod settings;
mod submit;
mod tracker;
mod transport;
mod types;

pub use poll::{HttpStatusFetcher, PollTransport, StatusFetcher};
pub use push::{PushConnection, PushTransport};
pub use settings::{PollSettings, PushSettings, SettingsError, SubmitSettings, TrackerSettings};
pub use submit::{HttpJobSubmitter, JobSubmitter, SubmitRequest};
pub use tracker::JobTracker;
pub use transport::{ChannelSink, Delivery, SnapshotSink, Transport, TransportHandle};
pub use types::{SubmitError, TransportError};
