use serde::Serialize;

/// A resampled raster persisted in the `images` table.
///
/// `pixels` holds PNG bytes once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ImageRecord {
    pub depth: f64,
    pub pixels: Vec<u8>,
}
