//! Error handling for the HTTP surface.

use std::error::Error;

use axum::{
    extract::{multipart::MultipartError, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use store_client::StoreError;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::ingest::IngestError;

const TECHNICAL: &str = "Technical";
const FUNCTIONAL: &str = "Functional";

const CODE_TECHNICAL_FAILURE: &str = "8100002";
const CODE_MIMETYPE_INVALID: &str = "8100003";
const CODE_FILE_NOT_PROVIDED: &str = "8100004";
const CODE_VALIDATION: &str = "81000008";

/// Request-level failure. Only client errors describe themselves to the caller; everything
/// else is logged and answered with a generic technical failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("File field name must be \"file\"")]
    FileNotProvided,

    #[error("Invalid file type")]
    InvalidMimeType,

    #[error("request query is not valid")]
    Validation(#[from] ValidationErrors),

    /// The query string itself could not be decoded, e.g. a repeated parameter. Reported with
    /// path `query`; malformed values of known parameters are `Validation` errors instead.
    #[error("request query is not valid")]
    Query(#[from] QueryRejection),

    #[error("failed to read multipart body")]
    Multipart(#[from] MultipartError),

    #[error("failed to stage upload")]
    Io(#[from] std::io::Error),

    #[error("failed to ingest upload")]
    Ingest(#[from] IngestError),

    #[error("failed to query store")]
    Store(#[from] StoreError),
}

/// One entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorEntry {
    fn new(kind: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.into(),
            path: None,
        }
    }

    fn validation(path: String, message: impl Into<String>) -> Self {
        Self {
            path: Some(path),
            ..Self::new(FUNCTIONAL, CODE_VALIDATION, message)
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorEntry>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, errors) = match &self {
            ApiError::FileNotProvided => (
                StatusCode::BAD_REQUEST,
                vec![ErrorEntry::new(TECHNICAL, CODE_FILE_NOT_PROVIDED, self.to_string())],
            ),
            ApiError::InvalidMimeType => (
                StatusCode::BAD_REQUEST,
                vec![ErrorEntry::new(TECHNICAL, CODE_MIMETYPE_INVALID, self.to_string())],
            ),
            ApiError::Validation(errors) => (StatusCode::BAD_REQUEST, validation_error_mapper(errors)),
            ApiError::Query(rejection) => (
                StatusCode::BAD_REQUEST,
                vec![ErrorEntry::validation("query".to_string(), rejection.body_text())],
            ),
            ApiError::Multipart(e) if e.status().is_client_error() => {
                tracing::warn!(error = %e, "malformed multipart body");
                (e.status(), vec![technical_failure()])
            }
            _ => {
                tracing::error!(error = %self, causes = ?cause_chain(&self), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, vec![technical_failure()])
            }
        };

        (status, Json(ErrorResponse { errors })).into_response()
    }
}

fn technical_failure() -> ErrorEntry {
    ErrorEntry::new(TECHNICAL, CODE_TECHNICAL_FAILURE, "Technical Failure")
}

fn cause_chain(error: &dyn Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes.dedup();
    causes
}

/// Flatten nested validation failures into one entry per failed rule, ordered by path.
///
/// Struct-level failures carry the offending field in a `field` parameter.
pub fn validation_error_mapper(errors: &ValidationErrors) -> Vec<ErrorEntry> {
    fn walk(errors: &ValidationErrors, prefix: &[String], out: &mut Vec<ErrorEntry>) {
        for (field, kind) in errors.errors() {
            let mut path = prefix.to_vec();
            match kind {
                ValidationErrorsKind::Field(failures) => {
                    for failure in failures {
                        let name = match failure.params.get("field").and_then(|v| v.as_str()) {
                            Some(named) => named.to_string(),
                            None => camel_case(field),
                        };
                        path.push(name);
                        let message = failure
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("{} is not valid ({})", path.join("."), failure.code));
                        out.push(ErrorEntry::validation(path.join("."), message));
                        path.pop();
                    }
                }
                ValidationErrorsKind::Struct(nested) => {
                    path.push(camel_case(field));
                    walk(nested, &path, out);
                }
                ValidationErrorsKind::List(items) => {
                    for (index, nested) in items {
                        let mut item_path = path.clone();
                        item_path.push(format!("{}[{index}]", camel_case(field)));
                        walk(nested, &item_path, out);
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(errors, &[], &mut out);
    out.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.message.cmp(&b.message)));
    out
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::ValidationError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn file_not_provided_is_a_technical_bad_request() {
        let response = ApiError::FileNotProvided.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "errors": [{ "type": "Technical", "code": "8100004", "message": "File field name must be \"file\"" }]
            })
        );
    }

    #[tokio::test]
    async fn invalid_mime_type_uses_its_own_code() {
        let response = ApiError::InvalidMimeType.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "8100003");
        assert_eq!(body["errors"][0]["message"], "Invalid file type");
    }

    #[tokio::test]
    async fn internal_failures_hide_their_details() {
        let err = ApiError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "errors": [{ "type": "Technical", "code": "8100002", "message": "Technical Failure" }]
            })
        );
    }

    #[tokio::test]
    async fn validation_errors_carry_camel_case_paths() {
        let mut errors = ValidationErrors::new();
        let mut range = ValidationError::new("range");
        range.message = Some("topPlants must be between 1 and 10000".into());
        errors.add("top_plants", range);

        let mut schema = ValidationError::new("depth_order");
        schema.add_param("field".into(), &"depthMax");
        schema.message = Some("depthMax must be larger than depthMin".into());
        errors.add("__all__", schema);

        let response = ApiError::Validation(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "errors": [
                    { "type": "Functional", "code": "81000008", "message": "depthMax must be larger than depthMin", "path": "depthMax" },
                    { "type": "Functional", "code": "81000008", "message": "topPlants must be between 1 and 10000", "path": "topPlants" }
                ]
            })
        );
    }

    #[test]
    fn camel_cases_snake_case_names() {
        assert_eq!(camel_case("top_plants"), "topPlants");
        assert_eq!(camel_case("depthMin"), "depthMin");
        assert_eq!(camel_case("state"), "state");
    }
}
