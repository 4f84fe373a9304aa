use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

use crate::{
    ingest::PlantWriteSettings,
    sources::PlantSheetLayout,
    transform::PixelPolicy,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Prepended to every route, e.g. `/api`. Empty serves from the root.
    pub route_prefix: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            route_prefix: String::new(),
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory://` or a PostgreSQL connection URI.
    pub uri: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "memory://".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.uri.starts_with("memory://")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub original_width: u32,
    pub target_width: u32,
    pub max_concurrent_resizes: usize,
    pub reject_non_numeric_pixels: bool,
    pub channel_capacity: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            original_width: 200,
            target_width: 150,
            max_concurrent_resizes: 64,
            reject_non_numeric_pixels: false,
            channel_capacity: 1024,
        }
    }
}

impl ImagesConfig {
    pub fn pixel_policy(&self) -> PixelPolicy {
        if self.reject_non_numeric_pixels {
            PixelPolicy::Strict
        } else {
            PixelPolicy::Lenient
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlantsConfig {
    #[serde(flatten)]
    pub layout: PlantSheetLayout,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PlantsConfig {
    fn default() -> Self {
        Self {
            layout: PlantSheetLayout::default(),
            batch_size: 1000,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl PlantsConfig {
    pub fn write_settings(&self) -> PlantWriteSettings {
        PlantWriteSettings {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub temp_dir: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("uploads/tmp"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub images: ImagesConfig,
    pub plants: PlantsConfig,
    pub uploads: UploadsConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.images.original_width == 0 || self.images.target_width == 0 {
            anyhow::bail!("images.original_width and images.target_width must be positive");
        }
        if self.images.max_concurrent_resizes == 0 {
            anyhow::bail!("images.max_concurrent_resizes must be positive");
        }
        if self.plants.layout.columns().contains(&0) {
            anyhow::bail!("plant column numbers are 1-based; 0 is not a column");
        }
        if !self.server.route_prefix.is_empty() && !self.server.route_prefix.starts_with('/') {
            anyhow::bail!("server.route_prefix must start with '/'");
        }
        Ok(())
    }
}
