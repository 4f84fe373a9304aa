//! Read-time aggregates over stored plants.

use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use store_client::{
    domain::{round_to_cents, PlantPercentage, PlantRecord, StateTotal},
    PlantRepository, StoreError,
};

pub const DEFAULT_TOP_PLANTS: u32 = 20;
pub const DEFAULT_STATE: &str = "AK";

/// Which aggregate a plant query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlantFilter {
    State,
    Plants,
    StateTotals,
    PlantPercentage,
}

impl PlantFilter {
    pub const VALUES: [&'static str; 4] = ["state", "plants", "stateTotals", "plantPercentage"];
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plant filter {0:?}")]
pub struct UnknownPlantFilter(pub String);

impl FromStr for PlantFilter {
    type Err = UnknownPlantFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::State),
            "plants" => Ok(Self::Plants),
            "stateTotals" => Ok(Self::StateTotals),
            "plantPercentage" => Ok(Self::PlantPercentage),
            other => Err(UnknownPlantFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlantsView {
    Plants(Vec<PlantRecord>),
    StateTotals(BTreeMap<String, f64>),
    Percentages(Vec<PlantPercentage>),
}

/// State code to total net generation, each total rounded to 2 decimals.
pub fn state_totals_mapper(totals: &[StateTotal]) -> BTreeMap<String, f64> {
    totals
        .iter()
        .map(|t| (t.state.clone(), round_to_cents(t.total)))
        .collect()
}

#[derive(Clone)]
pub struct PlantsService {
    plants: Arc<dyn PlantRepository>,
}

impl PlantsService {
    pub fn new(plants: Arc<dyn PlantRepository>) -> Self {
        Self { plants }
    }

    /// Answer a plant query. No filter means the top 20 plants.
    pub async fn get_plants(
        &self,
        filter: Option<PlantFilter>,
        top_plants: Option<u32>,
        state: Option<&str>,
    ) -> Result<PlantsView, StoreError> {
        match filter {
            Some(PlantFilter::Plants) => self.top_plants(top_plants.unwrap_or(DEFAULT_TOP_PLANTS)).await,
            Some(PlantFilter::StateTotals) => Ok(PlantsView::StateTotals(state_totals_mapper(
                &self.plants.group_sum().await?,
            ))),
            Some(PlantFilter::State) => Ok(PlantsView::Plants(
                self.plants.find_by_state(state.unwrap_or(DEFAULT_STATE)).await?,
            )),
            Some(PlantFilter::PlantPercentage) => Ok(PlantsView::Percentages(self.plants.percentages().await?)),
            None => self.top_plants(DEFAULT_TOP_PLANTS).await,
        }
    }

    async fn top_plants(&self, limit: u32) -> Result<PlantsView, StoreError> {
        Ok(PlantsView::Plants(self.plants.top_by_generation(limit).await?))
    }
}
