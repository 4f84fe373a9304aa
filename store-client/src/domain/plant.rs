use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlantRecord {
    pub plant_name: String,
    pub state: String,
    /// Always non-negative; the sign is dropped at ingestion.
    pub annual_net_generation: f64,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// Unrounded per-state sum as returned by the grouped query.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StateTotal {
    pub state: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlantPercentage {
    pub plant_name: String,
    pub state: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub annual_net_generation: f64,
    pub state_total_annual_net_generation: f64,
    /// Share of the state total, `None` when the state total is zero.
    pub percentage: Option<f64>,
}

/// Round half away from zero to two decimal places.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_cents_handles_excess_precision() {
        assert_eq!(round_to_cents(12345.6789), 12345.68);
        assert_eq!(round_to_cents(98765.4321), 98765.43);
        assert_eq!(round_to_cents(0.005), 0.01);
        assert_eq!(round_to_cents(42.0), 42.0);
    }

    #[test]
    fn plant_record_serializes_camel_case() {
        let plant = PlantRecord {
            plant_name: "Hoover".to_string(),
            state: "NV".to_string(),
            annual_net_generation: 10.5,
            latitude: Some("36.01".to_string()),
            longitude: None,
        };

        let json = serde_json::to_value(&plant).unwrap();
        assert_eq!(json["plantName"], "Hoover");
        assert_eq!(json["annualNetGeneration"], 10.5);
        assert!(json["longitude"].is_null());
    }
}
