use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use store_client::domain::ImageRecord;
use validator::{Validate, ValidationError, ValidationErrors};

use super::{error::ApiError, upload::stage_upload, validated_query::ValidatedQuery};
use crate::{
    aggregation::{PlantFilter, PlantsView},
    app::SharedAppState,
};

/// Raw `depthMin`/`depthMax` parameters.
///
/// Values are kept as text and checked by the validator, so a malformed number is reported
/// against its own parameter name.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_depth_order", skip_on_field_errors = true))]
pub struct ImageQuery {
    #[validate(
        required(message = "depthMin should not be empty"),
        custom(function = "validate_depth", message = "depthMin must be a number")
    )]
    pub depth_min: Option<String>,
    #[validate(
        required(message = "depthMax should not be empty"),
        custom(function = "validate_depth", message = "depthMax must be a number")
    )]
    pub depth_max: Option<String>,
}

fn parse_depth(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|d| d.is_finite())
}

fn validate_depth(raw: &str) -> Result<(), ValidationError> {
    parse_depth(raw).map(|_| ()).ok_or_else(|| ValidationError::new("is_number"))
}

fn validate_depth_order(query: &ImageQuery) -> Result<(), ValidationError> {
    match query.parsed() {
        (Some(min), Some(max)) if max > min => Ok(()),
        (Some(_), Some(_)) => {
            let mut err = ValidationError::new("is_bigger_than");
            err.add_param("field".into(), &"depthMax");
            err.message = Some("depthMax must be larger than depthMin".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

impl ImageQuery {
    fn parsed(&self) -> (Option<f64>, Option<f64>) {
        (
            self.depth_min.as_deref().and_then(parse_depth),
            self.depth_max.as_deref().and_then(parse_depth),
        )
    }

    /// `(depthMin, depthMax)` once both are present and numeric.
    pub fn bounds(&self) -> Result<(f64, f64), ValidationErrors> {
        match self.parsed() {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(self.validate().err().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlantsQuery {
    #[validate(custom(
        function = "validate_filter_by",
        message = "FilterBy must be one of the following values: state, plants, stateTotals, plantPercentage"
    ))]
    pub filter_by: Option<String>,
    #[validate(custom(function = "validate_top_plants", message = "topPlants must be between 1 and 10000"))]
    pub top_plants: Option<String>,
    #[validate(length(min = 1, max = 16, message = "state must be between 1 and 16 characters"))]
    pub state: Option<String>,
}

fn validate_filter_by(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<PlantFilter>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("is_enum"))
}

fn parse_top_plants(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|n| (1..=10000).contains(n))
}

fn validate_top_plants(raw: &str) -> Result<(), ValidationError> {
    parse_top_plants(raw).map(|_| ()).ok_or_else(|| ValidationError::new("range"))
}

impl PlantsQuery {
    pub fn filter(&self) -> Option<PlantFilter> {
        self.filter_by.as_deref().and_then(|f| f.parse().ok())
    }

    pub fn top_plants(&self) -> Option<u32> {
        self.top_plants.as_deref().and_then(parse_top_plants)
    }
}

pub async fn health() -> &'static str {
    "container running"
}

pub async fn get_images(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<ImageQuery>,
) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    let (depth_min, depth_max) = query.bounds()?;
    let images = state.images.find_by_range(depth_min, depth_max).await?;
    tracing::debug!(depth_min, depth_max, found = images.len(), "images queried");
    Ok(Json(images))
}

pub async fn get_plants(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<PlantsQuery>,
) -> Result<Json<PlantsView>, ApiError> {
    let view = state
        .plants
        .get_plants(query.filter(), query.top_plants(), query.state.as_deref())
        .await?;
    Ok(Json(view))
}

/// Acknowledges once every row is scheduled; persistence finishes in the background.
pub async fn upload_image_csv(
    State(state): State<SharedAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StatusCode, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        tracing::warn!(error = %rejection, "image upload is not a multipart request");
        ApiError::FileNotProvided
    })?;
    let upload = stage_upload(multipart, &state.temp_dir).await?;
    let accepted = state.image_ingestion.accept(upload).await?;
    tracing::info!(rows_scheduled = accepted.rows_scheduled, "image upload accepted");
    Ok(StatusCode::OK)
}

pub async fn upload_plant_sheet(
    State(state): State<SharedAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StatusCode, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        tracing::warn!(error = %rejection, "plant upload is not a multipart request");
        ApiError::FileNotProvided
    })?;
    let upload = stage_upload(multipart, &state.temp_dir).await?;
    let stored = state.plant_ingestion.ingest(upload).await?;
    tracing::info!(stored, "plant upload stored");
    Ok(StatusCode::OK)
}
