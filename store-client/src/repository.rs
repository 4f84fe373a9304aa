use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{
    db::{image_queries, plant_queries},
    domain::{ImageRecord, PlantPercentage, PlantRecord, StateTotal},
    StoreError,
};

/// Storage for resampled images.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Write all images in one call. Returns the number of rows written.
    async fn bulk_insert(&self, images: &[ImageRecord]) -> Result<u64, StoreError>;

    /// Images with `depth_min <= depth <= depth_max`, in no particular order.
    async fn find_by_range(&self, depth_min: f64, depth_max: f64) -> Result<Vec<ImageRecord>, StoreError>;
}

/// Storage and read-time aggregates for power plants.
#[async_trait]
pub trait PlantRepository: Send + Sync {
    async fn bulk_insert(&self, plants: &[PlantRecord]) -> Result<u64, StoreError>;

    /// At most `limit` plants, largest annual net generation first.
    async fn top_by_generation(&self, limit: u32) -> Result<Vec<PlantRecord>, StoreError>;

    async fn find_by_state(&self, state: &str) -> Result<Vec<PlantRecord>, StoreError>;

    /// Unrounded net generation sum per state.
    async fn group_sum(&self) -> Result<Vec<StateTotal>, StoreError>;

    /// Each plant with its state total and percentage share, largest generation first.
    async fn percentages(&self) -> Result<Vec<PlantPercentage>, StoreError>;
}

/// PostgreSQL-backed store. Schema is applied out-of-band, see `sql/schema.sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImageRepository for PgStore {
    async fn bulk_insert(&self, images: &[ImageRecord]) -> Result<u64, StoreError> {
        if images.is_empty() {
            return Ok(0);
        }
        Ok(image_queries::insert_images(&self.pool, images).await?)
    }

    async fn find_by_range(&self, depth_min: f64, depth_max: f64) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(image_queries::images_in_depth_range(&self.pool, depth_min, depth_max).await?)
    }
}

#[async_trait]
impl PlantRepository for PgStore {
    async fn bulk_insert(&self, plants: &[PlantRecord]) -> Result<u64, StoreError> {
        if plants.is_empty() {
            return Ok(0);
        }
        Ok(plant_queries::insert_plants(&self.pool, plants).await?)
    }

    async fn top_by_generation(&self, limit: u32) -> Result<Vec<PlantRecord>, StoreError> {
        Ok(plant_queries::top_plants(&self.pool, i64::from(limit)).await?)
    }

    async fn find_by_state(&self, state: &str) -> Result<Vec<PlantRecord>, StoreError> {
        Ok(plant_queries::plants_in_state(&self.pool, state).await?)
    }

    async fn group_sum(&self) -> Result<Vec<StateTotal>, StoreError> {
        Ok(plant_queries::state_totals(&self.pool).await?)
    }

    async fn percentages(&self) -> Result<Vec<PlantPercentage>, StoreError> {
        Ok(plant_queries::plant_percentages(&self.pool).await?)
    }
}
