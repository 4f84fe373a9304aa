pub mod image;
pub mod plant;

pub use image::ImageRecord;
pub use plant::{round_to_cents, PlantPercentage, PlantRecord, StateTotal};
