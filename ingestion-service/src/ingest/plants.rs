use std::{sync::Arc, time::{Duration, Instant}};

use store_client::{domain::PlantRecord, PlantRepository};
use tracing::Instrument;

use super::{IngestError, StagedUpload};
use crate::{
    pipeline::Pipeline,
    sinks::PlantStoreSink,
    sources::{PlantSheetFileSource, PlantSheetLayout},
    transform::PlantNormalization,
};

/// Batching and retry settings for plant writes.
#[derive(Debug, Clone, Copy)]
pub struct PlantWriteSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

/// Parses a plant workbook and stores its rows before returning.
#[derive(Clone)]
pub struct PlantIngestion {
    layout: PlantSheetLayout,
    plants: Arc<dyn PlantRepository>,
    settings: PlantWriteSettings,
}

impl PlantIngestion {
    pub fn new(layout: PlantSheetLayout, plants: Arc<dyn PlantRepository>, settings: PlantWriteSettings) -> Self {
        Self {
            layout,
            plants,
            settings,
        }
    }

    /// Returns the number of plants stored. The file is removed whether or not this succeeds,
    /// and also when the caller stops waiting: the work runs on its own task.
    pub async fn ingest(&self, upload: StagedUpload) -> Result<u64, IngestError> {
        let span = tracing::info_span!("plant_upload", path = %upload.path().display());
        let this = self.clone();
        tokio::spawn(async move { this.store(upload).await }.instrument(span))
            .await
            .map_err(IngestError::Task)?
    }

    async fn store(&self, upload: StagedUpload) -> Result<u64, IngestError> {
        let started = Instant::now();
        tracing::info!(sheet = %self.layout.sheet_name, "plant workbook processing started");

        let pipeline: Pipeline<_, PlantRecord, _> = Pipeline {
            source: PlantSheetFileSource::new(upload.path(), self.layout.clone()),
            transforms: vec![Arc::new(PlantNormalization)],
            sink: PlantStoreSink::new(
                self.plants.clone(),
                self.settings.batch_size,
                self.settings.max_retries,
                self.settings.retry_backoff,
            ),
        };
        let result = pipeline.run().await;
        upload.cleanup().await;

        match result {
            Ok(stored) => {
                tracing::info!(stored, elapsed_ms = started.elapsed().as_millis() as u64, "plant workbook stored");
                Ok(stored)
            }
            Err(e) => {
                tracing::error!(error = %e, "plant workbook processing failed");
                Err(IngestError::Plants(e))
            }
        }
    }
}
