use std::{fs::File, path::PathBuf, sync::Arc};

use csv::{ByteRecord, StringRecord};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// One data row of an image CSV, keyed by the header row.
///
/// Exactly one column is expected to be named `depth`; every other column is a pixel sample.
#[derive(Debug, Clone)]
pub struct RawImageRow {
    headers: Arc<StringRecord>,
    record: StringRecord,
}

impl RawImageRow {
    pub fn new(headers: Arc<StringRecord>, record: StringRecord) -> Self {
        Self { headers, record }
    }

    /// Value of the named column, if the header has it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| self.record.get(idx))
    }

    /// `(column, value)` pairs in file column order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().zip(self.record.iter())
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }
}

/// Streams the rows of an image CSV in file order.
///
/// The `csv` reader is blocking, so it runs on the blocking pool and hands rows over a bounded
/// channel; a slow consumer holds the reader back instead of buffering the whole file.
pub struct ImageCsvFileSource {
    path: PathBuf,
    channel_capacity: usize,
}

impl ImageCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, channel_capacity: usize) -> Self {
        Self {
            path: path.into(),
            channel_capacity: channel_capacity.max(1),
        }
    }
}

type RowSender = mpsc::Sender<Result<Envelope<RawImageRow>, PipelineError>>;

fn read_rows(path: PathBuf, tx: RowSender) {
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.blocking_send(Err(PipelineError::Source(format!("failed to open CSV file: {e}"))));
            return;
        }
    };

    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers = match rdr.byte_headers() {
        Ok(h) => Arc::new(StringRecord::from_byte_record_lossy(h.clone())),
        Err(e) => {
            let _ = tx.blocking_send(Err(PipelineError::Source(format!("failed to read CSV headers: {e}"))));
            return;
        }
    };

    // Cells are decoded lossily: a stray non-UTF-8 byte spoils one value, not the stream.
    let mut record = ByteRecord::new();
    let mut position: u64 = 0;
    loop {
        match rdr.read_byte_record(&mut record) {
            Ok(true) => {
                position += 1;
                let row = RawImageRow::new(headers.clone(), StringRecord::from_byte_record_lossy(record.clone()));
                if tx.blocking_send(Ok(Envelope::new(row, position))).is_err() {
                    // Receiver dropped; the batch was abandoned.
                    return;
                }
            }
            Ok(false) => return,
            Err(e) => {
                metrics::counter!("image_csv_stream_errors_total").increment(1);
                let _ = tx.blocking_send(Err(PipelineError::Source(format!(
                    "failed to read CSV record after row {position}: {e}"
                ))));
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl Source<RawImageRow> for ImageCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<RawImageRow> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_rows(path, tx));

        Box::pin(ReceiverStream::new(rx))
    }
}
