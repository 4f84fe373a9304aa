use std::{path::PathBuf, sync::Arc};

use store_client::{ImageRepository, MemoryStore, PgStore, PlantRepository, StoreError};

use crate::{
    aggregation::PlantsService,
    config::{AppConfig, DatabaseConfig},
    ingest::{ImageIngestion, PlantIngestion},
    transform::{Resampler, RowTransformer},
};

/// Repository handles for both record kinds, backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub images: Arc<dyn ImageRepository>,
    pub plants: Arc<dyn PlantRepository>,
}

impl Repositories {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        if cfg.is_memory() {
            tracing::warn!("using in-process store; data is lost on exit");
            return Ok(Self::in_memory(Arc::new(MemoryStore::new())));
        }

        let store = Arc::new(PgStore::connect(&cfg.uri, cfg.max_connections).await?);
        tracing::info!(max_connections = cfg.max_connections, "connected to postgres");
        Ok(Self {
            images: store.clone(),
            plants: store,
        })
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            images: store.clone(),
            plants: store,
        }
    }
}

/// Everything a request handler needs.
pub struct AppState {
    pub images: Arc<dyn ImageRepository>,
    pub plants: PlantsService,
    pub image_ingestion: ImageIngestion,
    pub plant_ingestion: PlantIngestion,
    pub temp_dir: PathBuf,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(cfg: &AppConfig, repos: Repositories) -> Self {
        let image_ingestion = ImageIngestion::new(
            Arc::new(RowTransformer::new(cfg.images.pixel_policy())),
            Arc::new(Resampler::new(
                cfg.images.original_width,
                cfg.images.target_width,
                cfg.images.max_concurrent_resizes,
            )),
            repos.images.clone(),
            cfg.images.channel_capacity,
        );
        let plant_ingestion = PlantIngestion::new(
            cfg.plants.layout.clone(),
            repos.plants.clone(),
            cfg.plants.write_settings(),
        );

        Self {
            images: repos.images,
            plants: PlantsService::new(repos.plants),
            image_ingestion,
            plant_ingestion,
            temp_dir: cfg.uploads.temp_dir.clone(),
        }
    }
}
