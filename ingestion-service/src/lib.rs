pub mod aggregation;
pub mod app;
pub mod config;
pub mod http;
pub mod ingest;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use app::{AppState, Repositories, SharedAppState};
pub use pipeline::{Envelope, Pipeline};
