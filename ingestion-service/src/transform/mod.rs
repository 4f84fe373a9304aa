pub mod plant;
pub mod resample;
pub mod row;

pub use plant::{normalize_plant, PlantNormalization};
pub use resample::{resample, ResampleError, Resampler};
pub use row::{transform_row, DecodedRow, PixelPolicy, RowError, RowTransformer};
