use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    domain::{round_to_cents, ImageRecord, PlantPercentage, PlantRecord, StateTotal},
    ImageRepository, PlantRepository, StoreError,
};

/// In-process store with the same query semantics as [`crate::PgStore`].
///
/// Selected with `database.uri = "memory://"`; data lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    images: RwLock<Vec<ImageRecord>>,
    plants: RwLock<Vec<PlantRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn image_count(&self) -> usize {
        self.images.read().await.len()
    }

    pub async fn plant_count(&self) -> usize {
        self.plants.read().await.len()
    }
}

/// Plants sorted largest generation first; ties keep insertion order.
fn by_generation_desc(plants: &[PlantRecord]) -> Vec<PlantRecord> {
    let mut sorted = plants.to_vec();
    sorted.sort_by(|a, b| b.annual_net_generation.total_cmp(&a.annual_net_generation));
    sorted
}

fn sums_by_state(plants: &[PlantRecord]) -> BTreeMap<String, f64> {
    let mut sums = BTreeMap::new();
    for p in plants {
        *sums.entry(p.state.clone()).or_insert(0.0) += p.annual_net_generation;
    }
    sums
}

#[async_trait]
impl ImageRepository for MemoryStore {
    async fn bulk_insert(&self, images: &[ImageRecord]) -> Result<u64, StoreError> {
        self.images.write().await.extend_from_slice(images);
        Ok(images.len() as u64)
    }

    async fn find_by_range(&self, depth_min: f64, depth_max: f64) -> Result<Vec<ImageRecord>, StoreError> {
        let images = self.images.read().await;
        Ok(images
            .iter()
            .filter(|img| img.depth >= depth_min && img.depth <= depth_max)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlantRepository for MemoryStore {
    async fn bulk_insert(&self, plants: &[PlantRecord]) -> Result<u64, StoreError> {
        self.plants.write().await.extend_from_slice(plants);
        Ok(plants.len() as u64)
    }

    async fn top_by_generation(&self, limit: u32) -> Result<Vec<PlantRecord>, StoreError> {
        let plants = self.plants.read().await;
        let mut sorted = by_generation_desc(&plants);
        sorted.truncate(limit as usize);
        Ok(sorted)
    }

    async fn find_by_state(&self, state: &str) -> Result<Vec<PlantRecord>, StoreError> {
        let plants = self.plants.read().await;
        Ok(plants.iter().filter(|p| p.state == state).cloned().collect())
    }

    async fn group_sum(&self) -> Result<Vec<StateTotal>, StoreError> {
        let plants = self.plants.read().await;
        Ok(sums_by_state(&plants)
            .into_iter()
            .map(|(state, total)| StateTotal { state, total })
            .collect())
    }

    async fn percentages(&self) -> Result<Vec<PlantPercentage>, StoreError> {
        let plants = self.plants.read().await;
        let totals = sums_by_state(&plants);

        Ok(by_generation_desc(&plants)
            .into_iter()
            .map(|p| {
                let state_total = totals.get(&p.state).copied().unwrap_or(0.0);
                let percentage = if state_total == 0.0 {
                    None
                } else {
                    Some(round_to_cents(p.annual_net_generation / state_total * 100.0))
                };
                PlantPercentage {
                    plant_name: p.plant_name,
                    state: p.state,
                    latitude: p.latitude,
                    longitude: p.longitude,
                    annual_net_generation: p.annual_net_generation,
                    state_total_annual_net_generation: state_total,
                    percentage,
                }
            })
            .collect())
    }
}
