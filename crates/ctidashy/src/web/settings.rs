//! Settings panel.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::extract::JsonBody;
use super::response::{success, success_with};
use super::session::CurrentUser;
use super::AppState;
use crate::config::{OpenCtiConfig, SettingsUpdate};
use crate::error::{Error, Result};
use crate::users::Panel;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(show).post(save))
        .route("/settings/test_opencti", post(test_opencti))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectionTest {
    opencti_url: Option<String>,
    opencti_api: Option<String>,
}

async fn show(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Settings)?;
    success_with("config", &state.config().await.redacted())
}

async fn save(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(update): JsonBody<SettingsUpdate>,
) -> Result<Json<Value>> {
    user.require(Panel::Settings)?;
    state.update_config(update).await?;
    info!("{} saved the settings", user.0.username);
    Ok(success("Settings saved successfully"))
}

async fn test_opencti(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(test): JsonBody<ConnectionTest>,
) -> Result<Json<Value>> {
    user.require(Panel::Settings)?;
    let url = test
        .opencti_url
        .filter(|u| !u.trim().is_empty())
        .ok_or(Error::MissingField {
            field: "opencti_url",
        })?;
    let api_key = test
        .opencti_api
        .filter(|k| !k.trim().is_empty())
        .ok_or(Error::MissingField {
            field: "opencti_api",
        })?;

    let mut connection = OpenCtiConfig::with_credentials(url, api_key);
    let current = state.config().await.opencti;
    connection.timeout_secs = current.timeout_secs;
    connection.verify_tls = current.verify_tls;

    let version = state.backend().client(&connection)?.about_version().await?;
    info!("OpenCTI connection test succeeded, version {version}");
    Ok(success(format!(
        "Connected successfully! OpenCTI version: {version}"
    )))
}
