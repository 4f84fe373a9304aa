//! Axum extractor that deserialises and validates a query string.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use super::error::ApiError;

/// Like [`Query`], but the value is also checked with the validator crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        value.validate()?;
        Ok(ValidatedQuery(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
        routing::get,
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize, Validate)]
    struct Paging {
        #[validate(range(min = 1, max = 3, message = "limit must be between 1 and 3"))]
        limit: u32,
    }

    async fn handler(ValidatedQuery(paging): ValidatedQuery<Paging>) -> String {
        format!("limit: {}", paging.limit)
    }

    async fn request(uri: &str) -> Response {
        Router::new()
            .route("/", get(handler))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn ok() {
        let response = request("/?limit=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "limit: 2");
    }

    #[tokio::test]
    async fn out_of_range() {
        let response = request("/?limit=4").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("limit must be between 1 and 3"), "body: {body}");
        assert!(body.contains(r#""path":"limit""#), "body: {body}");
    }

    #[tokio::test]
    async fn not_a_number() {
        let response = request("/?limit=many").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("81000008"), "body: {body}");
    }
}
