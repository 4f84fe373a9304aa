use std::sync::Arc;

use image::{codecs::png::PngEncoder, imageops, imageops::FilterType, ExtendedColorType, GrayImage, ImageEncoder};
use store_client::domain::ImageRecord;
use tokio::sync::Semaphore;

use super::row::DecodedRow;
use crate::pipeline::{Envelope, PipelineError, Transform};

#[derive(thiserror::Error, Debug)]
pub enum ResampleError {
    #[error("row has no pixel samples")]
    Empty,
    #[error("raster width must be non-zero")]
    ZeroWidth,
    #[error("{len} samples do not fill whole rows of width {width}")]
    Ragged { len: usize, width: u32 },
    #[error("raster height {0} out of range")]
    TooTall(usize),
    #[error("failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),
}

/// Height that keeps the aspect ratio of `width x height` at `target_width`, at least 1.
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let (w, h, t) = (u64::from(width), u64::from(height), u64::from(target_width));
    ((h * t + w / 2) / w).clamp(1, u64::from(u32::MAX)) as u32
}

/// Resize a single-channel raster of `original_width` columns to `target_width` columns and
/// encode it as PNG.
///
/// Height is inferred from the sample count. Output is a pure function of the input.
pub fn resample(samples: Vec<u8>, original_width: u32, target_width: u32) -> Result<Vec<u8>, ResampleError> {
    if original_width == 0 || target_width == 0 {
        return Err(ResampleError::ZeroWidth);
    }
    if samples.is_empty() {
        return Err(ResampleError::Empty);
    }
    let len = samples.len();
    if len % original_width as usize != 0 {
        return Err(ResampleError::Ragged {
            len,
            width: original_width,
        });
    }
    let rows = len / original_width as usize;
    let height = u32::try_from(rows).map_err(|_| ResampleError::TooTall(rows))?;

    let raster = GrayImage::from_raw(original_width, height, samples).ok_or(ResampleError::Ragged {
        len,
        width: original_width,
    })?;

    let target_height = scaled_height(original_width, height, target_width);
    let resized = imageops::resize(&raster, target_width, target_height, FilterType::Triangle);

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(resized.as_raw(), target_width, target_height, ExtendedColorType::L8)?;
    Ok(png)
}

type ResizeFn = dyn Fn(Vec<u8>, u32, u32) -> Result<Vec<u8>, ResampleError> + Send + Sync;

/// Turns decoded rows into PNG-encoded [`ImageRecord`]s.
///
/// Each resize runs on the blocking pool; the semaphore caps how many run at once.
#[derive(Clone)]
pub struct Resampler {
    original_width: u32,
    target_width: u32,
    permits: Arc<Semaphore>,
    resize: Arc<ResizeFn>,
}

impl Resampler {
    pub fn new(original_width: u32, target_width: u32, max_concurrent: usize) -> Self {
        Self {
            original_width,
            target_width,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            resize: Arc::new(resample),
        }
    }

    #[cfg(test)]
    fn with_resize<F>(mut self, resize: F) -> Self
    where
        F: Fn(Vec<u8>, u32, u32) -> Result<Vec<u8>, ResampleError> + Send + Sync + 'static,
    {
        self.resize = Arc::new(resize);
        self
    }
}

#[async_trait::async_trait]
impl Transform<DecodedRow, ImageRecord> for Resampler {
    async fn apply(&self, input: Envelope<DecodedRow>) -> Result<Envelope<ImageRecord>, PipelineError> {
        let position = input.position;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PipelineError::row(position, e))?;

        let samples = input.payload.samples();
        let (original_width, target_width) = (self.original_width, self.target_width);
        let resize = self.resize.clone();
        let png = tokio::task::spawn_blocking(move || resize(samples, original_width, target_width))
            .await
            .map_err(|e| PipelineError::row(position, format!("resample task failed: {e}")))?
            .map_err(|e| PipelineError::row(position, e))?;

        Ok(input.map(|row| ImageRecord {
            depth: row.depth,
            pixels: png,
        }))
    }
}
