//! JSON response bodies.
//!
//! Every failure leaves the server as `{"status": "error", "message": ...}`
//! with the status code of the underlying [`Error`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self}");
        } else if !self.is_auth_error() {
            warn!("Request rejected: {self}");
        }
        json_error(status, self.to_string())
    }
}

/// Build the uniform error body.
#[must_use]
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message.into() })),
    )
        .into_response()
}

/// `{"status": "success", "message": ...}`.
#[must_use]
pub fn success(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "status": "success", "message": message.into() }))
}

/// `{"status": "success", <key>: <value>}`.
///
/// # Errors
///
/// Returns [`Error::Json`] if `value` cannot be serialized.
pub fn success_with<T: Serialize>(key: &str, value: &T) -> Result<Json<Value>, Error> {
    let mut body = serde_json::Map::new();
    body.insert("status".to_string(), Value::from("success"));
    body.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(Json(Value::Object(body)))
}
