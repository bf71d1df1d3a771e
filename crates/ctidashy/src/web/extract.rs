//! Request extractors that fail with the uniform JSON error body.
//!
//! These wrap axum's `Json`, `Query` and `Path` so a malformed request is
//! answered as `{status: "error", message}` with the extractor's own status.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::error::Error;

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

/// JSON request body.
#[derive(Debug, Clone, Default)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Query-string parameters.
#[derive(Debug, Clone, Default)]
pub struct Query<T>(pub T);

impl<T, S> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Path parameters.
#[derive(Debug, Clone)]
pub struct Path<T>(pub T);

impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(value) =
            axum::extract::Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::StatusCode;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Form {
        name: String,
    }

    fn json_request(content_type: Option<&str>, body: &'static str) -> Request {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_json_body_accepts_valid_json() {
        let request = json_request(Some("application/json"), r#"{"name":"feedA"}"#);
        let JsonBody(form) = JsonBody::<Form>::from_request(request, &()).await.unwrap();
        assert_eq!(form.name, "feedA");
    }

    #[tokio::test]
    async fn test_json_body_rejections_keep_status() {
        let cases = [
            (Some("application/json"), "{not json", StatusCode::BAD_REQUEST),
            (None, r#"{"name":"x"}"#, StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (
                Some("application/json"),
                r#"{"name":5}"#,
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (content_type, body, status) in cases {
            let err = JsonBody::<Form>::from_request(json_request(content_type, body), &())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Rejected { .. }));
            assert_eq!(err.status_code(), status, "body {body}");
        }
    }

    #[tokio::test]
    async fn test_query_rejection_is_bad_request() {
        #[derive(Debug, Deserialize)]
        struct Page {
            #[allow(dead_code)]
            page: u32,
        }

        let request = Request::builder()
            .uri("/?page=many")
            .body(Body::empty())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let err = Query::<Page>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
