pub mod plant_store;

pub use plant_store::PlantStoreSink;
