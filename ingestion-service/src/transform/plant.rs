use store_client::domain::PlantRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure normalisation of a `PlantRecord`.
///
/// Rules:
/// - net generation is stored as an absolute value.
/// - net generation must be finite.
pub fn normalize_plant(env: Envelope<PlantRecord>) -> Result<Envelope<PlantRecord>, PipelineError> {
    if !env.payload.annual_net_generation.is_finite() {
        return Err(PipelineError::row(env.position, "net generation must be finite"));
    }

    Ok(env.map(|mut p| {
        p.annual_net_generation = p.annual_net_generation.abs();
        p
    }))
}

#[derive(Clone, Default)]
pub struct PlantNormalization;

#[async_trait::async_trait]
impl Transform<PlantRecord, PlantRecord> for PlantNormalization {
    async fn apply(&self, input: Envelope<PlantRecord>) -> Result<Envelope<PlantRecord>, PipelineError> {
        match normalize_plant(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("plant_rows_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
