use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    /// 1-based position of the record within its source (data rows only).
    pub position: u64,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, position: u64) -> Self {
        Self {
            payload,
            position,
            received_at: SystemTime::now(),
        }
    }

    /// Replace the payload, keeping position and arrival time.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            payload: f(self.payload),
            position: self.position,
            received_at: self.received_at,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The source itself is unreadable; nothing after this item can be trusted.
    #[error("source error: {0}")]
    Source(String),
    /// A single record was rejected; the rest of the stream is unaffected.
    #[error("row {position}: {reason}")]
    Row { position: u64, reason: String },
    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    pub fn row(position: u64, reason: impl ToString) -> Self {
        Self::Row {
            position,
            reason: reason.to_string(),
        }
    }

    pub fn is_row_scoped(&self) -> bool {
        matches!(self, Self::Row { .. })
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    /// Drain `input`, returning the number of records written.
    async fn run<S>(&self, input: S) -> Result<u64, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<u64, PipelineError> {
        let mut stream = self.source.stream().await;

        // Apply transforms in sequence (if any).
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}
