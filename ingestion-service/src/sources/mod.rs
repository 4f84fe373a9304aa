pub mod image_csv_file;
pub mod plant_sheet_file;

pub use image_csv_file::{ImageCsvFileSource, RawImageRow};
pub use plant_sheet_file::{PlantSheetFileSource, PlantSheetLayout};
