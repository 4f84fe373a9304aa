pub mod db;
pub mod domain;
pub mod error;
pub mod memory;
pub mod repository;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use repository::{ImageRepository, PgStore, PlantRepository};
