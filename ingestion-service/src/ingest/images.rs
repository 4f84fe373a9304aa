use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::StreamExt;
use store_client::{domain::ImageRecord, ImageRepository};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use super::{IngestError, StagedUpload};
use crate::{
    pipeline::{Envelope, PipelineError, Source, Transform},
    sources::{ImageCsvFileSource, RawImageRow},
    transform::DecodedRow,
};

/// Lifecycle of one image CSV batch.
///
/// `Streaming -> Draining -> Persisting -> Done`, or `Streaming -> Failed` when the file
/// cannot be read to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Streaming,
    Draining,
    Persisting,
    Done,
    Failed,
}

impl IngestState {
    pub fn can_advance_to(self, next: IngestState) -> bool {
        use IngestState::*;
        matches!(
            (self, next),
            (Streaming, Draining) | (Draining, Persisting) | (Persisting, Done) | (Streaming, Failed)
        )
    }
}

struct Batch {
    id: u64,
    state: IngestState,
}

impl Batch {
    fn advance(&mut self, next: IngestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid batch transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(batch = self.id, from = ?self.state, to = ?next, "image batch state change");
        self.state = next;
    }
}

/// What the caller gets once every row of the file has been scheduled.
///
/// `completion` resolves after the batch is drained, persisted and its file removed. Dropping
/// it detaches the batch; the outcome is then visible only in logs and metrics.
#[derive(Debug)]
pub struct Accepted {
    pub rows_scheduled: u64,
    pub completion: JoinHandle<BatchReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch: u64,
    pub rows_scheduled: u64,
    pub rows_failed: u64,
    pub images_persisted: u64,
    pub persist_error: Option<String>,
    pub state: IngestState,
}

type RowTransform = Arc<dyn Transform<RawImageRow, DecodedRow>>;
type ImageTransform = Arc<dyn Transform<DecodedRow, ImageRecord>>;
type UnitOutcome = Result<Envelope<ImageRecord>, PipelineError>;

/// Streams an image CSV, fans every row out to transform + resample, and persists the
/// successful rows in one bulk write after the last unit of work finishes.
///
/// Each call to [`ImageIngestion::accept`] owns its own task set; batches share nothing but
/// the repository.
#[derive(Clone)]
pub struct ImageIngestion {
    transformer: RowTransform,
    resampler: ImageTransform,
    images: Arc<dyn ImageRepository>,
    channel_capacity: usize,
    next_batch: Arc<AtomicU64>,
}

impl ImageIngestion {
    pub fn new(
        transformer: RowTransform,
        resampler: ImageTransform,
        images: Arc<dyn ImageRepository>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            transformer,
            resampler,
            images,
            channel_capacity,
            next_batch: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Read the whole file, scheduling one unit of work per row, and return without waiting
    /// for any of them.
    ///
    /// A stream-level failure aborts the scheduled units, removes the file and is returned.
    /// Streaming runs on its own task: dropping this future detaches the batch, which still
    /// completes and removes its file.
    pub async fn accept(&self, upload: StagedUpload) -> Result<Accepted, IngestError> {
        let batch = Batch {
            id: self.next_batch.fetch_add(1, Ordering::Relaxed),
            state: IngestState::Streaming,
        };
        let span = tracing::info_span!("image_batch", batch = batch.id, path = %upload.path().display());
        let this = self.clone();
        tokio::spawn(async move { this.stream(batch, upload).await }.instrument(span))
            .await
            .map_err(IngestError::Task)?
    }

    async fn stream(&self, mut batch: Batch, upload: StagedUpload) -> Result<Accepted, IngestError> {
        let source = ImageCsvFileSource::new(upload.path(), self.channel_capacity);
        let mut rows = source.stream().await;
        let mut units: JoinSet<UnitOutcome> = JoinSet::new();
        let mut rows_scheduled: u64 = 0;

        while let Some(item) = rows.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    batch.advance(IngestState::Failed);
                    tracing::error!(error = %e, rows_scheduled, "image CSV stream failed");
                    units.abort_all();
                    upload.cleanup().await;
                    return Err(IngestError::Stream(e));
                }
            };

            let transformer = self.transformer.clone();
            let resampler = self.resampler.clone();
            units.spawn(async move {
                let decoded = transformer.apply(env).await?;
                resampler.apply(decoded).await
            });
            rows_scheduled += 1;
        }

        metrics::counter!("image_rows_scheduled_total").increment(rows_scheduled);
        tracing::info!(rows_scheduled, "image CSV parsed, batch accepted");

        let completion = tokio::spawn(
            complete(batch, units, rows_scheduled, self.images.clone(), upload).instrument(tracing::Span::current()),
        );

        Ok(Accepted {
            rows_scheduled,
            completion,
        })
    }
}

async fn complete(
    mut batch: Batch,
    mut units: JoinSet<UnitOutcome>,
    rows_scheduled: u64,
    images: Arc<dyn ImageRepository>,
    upload: StagedUpload,
) -> BatchReport {
    batch.advance(IngestState::Draining);
    let mut resampled = Vec::with_capacity(units.len());
    let mut rows_failed: u64 = 0;
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(Ok(env)) => resampled.push(env.payload),
            Ok(Err(e)) => {
                rows_failed += 1;
                tracing::warn!(error = %e, "image row dropped");
            }
            Err(e) => {
                rows_failed += 1;
                tracing::error!(error = %e, "image unit of work did not complete");
            }
        }
    }
    metrics::counter!("image_rows_failed_total").increment(rows_failed);

    batch.advance(IngestState::Persisting);
    let (images_persisted, persist_error) = if resampled.is_empty() {
        (0, None)
    } else {
        match images.bulk_insert(&resampled).await {
            Ok(written) => {
                metrics::counter!("images_persisted_total").increment(written);
                (written, None)
            }
            Err(e) => {
                metrics::counter!("image_persist_errors_total").increment(1);
                tracing::error!(error = %e, images = resampled.len(), "failed to store images");
                (0, Some(e.to_string()))
            }
        }
    };

    upload.cleanup().await;
    batch.advance(IngestState::Done);
    tracing::info!(rows_scheduled, rows_failed, images_persisted, "image batch finished");

    BatchReport {
        batch: batch.id,
        rows_scheduled,
        rows_failed,
        images_persisted,
        persist_error,
        state: batch.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{RowTransformer, Resampler};
    use std::{path::PathBuf, time::Duration};
    use store_client::{MemoryStore, StoreError};
    use tokio::sync::Semaphore;

    const CSV_HEADER: &str = "depth,col1,col2,col3,col4\n";

    fn staged(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("upload.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn ingestion_with(images: Arc<dyn ImageRepository>, resampler: ImageTransform) -> ImageIngestion {
        ImageIngestion::new(Arc::new(RowTransformer::default()), resampler, images, 4)
    }

    fn ingestion(images: Arc<dyn ImageRepository>) -> ImageIngestion {
        ingestion_with(images, Arc::new(Resampler::new(2, 1, 4)))
    }

    /// Holds every resize until the test releases permits.
    struct Gated {
        gate: Arc<Semaphore>,
        inner: Resampler,
    }

    #[async_trait::async_trait]
    impl Transform<DecodedRow, ImageRecord> for Gated {
        async fn apply(&self, input: Envelope<DecodedRow>) -> Result<Envelope<ImageRecord>, PipelineError> {
            let _permit = self.gate.acquire().await.map_err(|e| PipelineError::row(input.position, e))?;
            self.inner.apply(input).await
        }
    }

    /// Fails the resize for one depth.
    struct FailsAt(f64);

    #[async_trait::async_trait]
    impl Transform<DecodedRow, ImageRecord> for FailsAt {
        async fn apply(&self, input: Envelope<DecodedRow>) -> Result<Envelope<ImageRecord>, PipelineError> {
            if input.payload.depth == self.0 {
                return Err(PipelineError::row(input.position, "resize failed"));
            }
            Resampler::new(2, 1, 1).apply(input).await
        }
    }

    struct Unavailable;

    #[async_trait::async_trait]
    impl ImageRepository for Unavailable {
        async fn bulk_insert(&self, _images: &[ImageRecord]) -> Result<u64, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn find_by_range(&self, _min: f64, _max: f64) -> Result<Vec<ImageRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    async fn stored_depths(store: &MemoryStore) -> Vec<f64> {
        let mut depths: Vec<f64> = store
            .find_by_range(f64::MIN, f64::MAX)
            .await
            .unwrap()
            .iter()
            .map(|i| i.depth)
            .collect();
        depths.sort_by(f64::total_cmp);
        depths
    }

    #[tokio::test]
    async fn bad_depth_row_is_isolated_from_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(
            &dir,
            &format!("{CSV_HEADER}1.5,0,255,255,0\nnot-a-depth,1,2,3,4\n2.5,9,9,9,9\n"),
        );
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion(store.clone()).accept(StagedUpload::temporary(&path)).await.unwrap();
        assert_eq!(accepted.rows_scheduled, 3);

        let report = accepted.completion.await.unwrap();
        assert_eq!(report.rows_scheduled, 3);
        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.images_persisted, 2);
        assert_eq!(report.state, IngestState::Done);
        assert_eq!(stored_depths(&store).await, vec![1.5, 2.5]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stored_pixels_are_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}3.0,10,20,30,40\n"));
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion(store.clone()).accept(StagedUpload::temporary(&path)).await.unwrap();
        accepted.completion.await.unwrap();

        let images = store.find_by_range(3.0, 3.0).await.unwrap();
        let decoded = image::load_from_memory(&images[0].pixels).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1, 1));
    }

    #[tokio::test]
    async fn failed_resize_does_not_fail_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n2,2,2,2,2\n3,3,3,3,3\n"));
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion_with(store.clone(), Arc::new(FailsAt(2.0)))
            .accept(StagedUpload::temporary(&path))
            .await
            .unwrap();
        let report = accepted.completion.await.unwrap();

        assert_eq!(report.rows_scheduled, 3);
        assert_eq!(report.rows_failed, 1);
        assert_eq!(stored_depths(&store).await, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn headers_only_file_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, CSV_HEADER);
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion(store.clone()).accept(StagedUpload::temporary(&path)).await.unwrap();
        assert_eq!(accepted.rows_scheduled, 0);

        let report = accepted.completion.await.unwrap();
        assert_eq!(report.images_persisted, 0);
        assert_eq!(report.persist_error, None);
        assert_eq!(store.image_count().await, 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn malformed_csv_fails_the_upload_and_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n2,2,2\n3,3,3,3,3\n"));
        let store = Arc::new(MemoryStore::new());

        let res = ingestion(store.clone()).accept(StagedUpload::temporary(&path)).await;

        assert!(matches!(res, Err(IngestError::Stream(PipelineError::Source(_)))));
        assert!(!path.exists());
        assert_eq!(store.image_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_caller_detaches_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n2,2,2,2,2\n3,3,3,3,3\n"));
        let store = Arc::new(MemoryStore::new());

        let ing = ingestion(store.clone());
        let res = tokio::time::timeout(Duration::ZERO, ing.accept(StagedUpload::temporary(&path))).await;
        assert!(res.is_err(), "accept finished before the caller gave up");

        let mut waited = Duration::ZERO;
        while path.exists() || store.image_count().await < 3 {
            assert!(waited < Duration::from_secs(5), "detached batch never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert_eq!(stored_depths(&store).await, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn invalid_utf8_cell_does_not_fail_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.csv");
        let mut contents = CSV_HEADER.as_bytes().to_vec();
        contents.extend_from_slice(b"1,1,1,1,1\n2,\xff,2,2,2\n3,3,3,3,3\n");
        std::fs::write(&path, contents).unwrap();
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion(store.clone()).accept(StagedUpload::temporary(&path)).await.unwrap();
        assert_eq!(accepted.rows_scheduled, 3);

        let report = accepted.completion.await.unwrap();
        assert_eq!(report.rows_failed, 0);
        assert_eq!(stored_depths(&store).await, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn acceptance_does_not_wait_for_resizing() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n2,2,2,2,2\n"));
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let resampler = Gated {
            gate: gate.clone(),
            inner: Resampler::new(2, 1, 4),
        };

        let accepted = ingestion_with(store.clone(), Arc::new(resampler))
            .accept(StagedUpload::temporary(&path))
            .await
            .unwrap();

        assert_eq!(accepted.rows_scheduled, 2);
        assert!(!accepted.completion.is_finished());
        assert_eq!(store.image_count().await, 0);

        gate.add_permits(2);
        let report = accepted.completion.await.unwrap();
        assert_eq!(report.images_persisted, 2);
        assert_eq!(store.image_count().await, 2);
    }

    #[tokio::test]
    async fn persist_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n"));

        let accepted = ingestion(Arc::new(Unavailable)).accept(StagedUpload::temporary(&path)).await.unwrap();
        let report = accepted.completion.await.unwrap();

        assert_eq!(report.state, IngestState::Done);
        assert_eq!(report.images_persisted, 0);
        assert!(report.persist_error.is_some());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn retained_uploads_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = staged(&dir, &format!("{CSV_HEADER}1,1,1,1,1\n"));
        let store = Arc::new(MemoryStore::new());

        let accepted = ingestion(store).accept(StagedUpload::retained(&path)).await.unwrap();
        accepted.completion.await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn only_forward_transitions_are_valid() {
        use IngestState::*;
        assert!(Streaming.can_advance_to(Draining));
        assert!(Streaming.can_advance_to(Failed));
        assert!(Persisting.can_advance_to(Done));
        assert!(!Draining.can_advance_to(Failed));
        assert!(!Done.can_advance_to(Streaming));
        assert!(!Streaming.can_advance_to(Persisting));
    }
}
