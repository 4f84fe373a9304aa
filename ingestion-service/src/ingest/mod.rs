//! Upload ingestion: image CSVs (two-phase, background completion) and plant spreadsheets
//! (synchronous).

pub mod images;
pub mod plants;
pub mod staged;

pub use images::{Accepted, BatchReport, ImageIngestion, IngestState};
pub use plants::{PlantIngestion, PlantWriteSettings};
pub use staged::StagedUpload;

use crate::pipeline::PipelineError;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The upload could not be read to the end; nothing from it is persisted.
    #[error("failed to read upload stream")]
    Stream(#[source] PipelineError),
    #[error("failed to store plant upload")]
    Plants(#[source] PipelineError),
    #[error("ingestion task did not complete")]
    Task(#[source] tokio::task::JoinError),
}
