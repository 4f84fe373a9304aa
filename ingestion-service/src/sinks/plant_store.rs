use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use store_client::{domain::PlantRecord, PlantRepository};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Buffers plant rows and writes them through a [`PlantRepository`] in batches.
///
/// Row-scoped upstream errors are logged and skipped; a source error stops the sink.
pub struct PlantStoreSink {
    plants: Arc<dyn PlantRepository>,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PlantStoreSink {
    pub fn new(plants: Arc<dyn PlantRepository>, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            plants,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(&self, batch: &[PlantRecord]) -> Result<u64, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut attempt: u32 = 0;
        loop {
            match self.plants.bulk_insert(batch).await {
                Ok(written) => {
                    metrics::counter!("plants_persisted_total").increment(written);
                    return Ok(written);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "plant batch insert failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "plant batch insert failed, giving up");
                    metrics::counter!("plant_persist_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<PlantRecord> for PlantStoreSink {
    async fn run<S>(&self, mut input: S) -> Result<u64, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PlantRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<PlantRecord> = Vec::with_capacity(self.batch_size);
        let mut written = 0;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) if e.is_row_scoped() => {
                    tracing::warn!(error = %e, "plant row skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };

            buffer.push(env.payload);
            if buffer.len() >= self.batch_size {
                written += self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        written += self.flush_batch(&buffer).await?;
        Ok(written)
    }
}
