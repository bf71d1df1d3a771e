//! Tor node panel.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::debug;

use super::session::CurrentUser;
use super::{blocking, AppState};
use crate::error::{Error, Result};
use crate::tor;
use crate::users::Panel;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/tor", get(nodes))
        .route(tor::CSV_URL, get(raw_csv))
        .route("/tor/status", get(status))
        .route("/tor/refresh", post(refresh))
}

async fn tor_dir(state: &AppState) -> Result<std::path::PathBuf> {
    state
        .config()
        .await
        .paths
        .tor_csv_dir
        .ok_or_else(|| Error::not_configured("Tor CSV directory"))
}

async fn nodes(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Tor)?;
    let dir = tor_dir(&state).await?;
    let refresh_interval = state.config().await.features.tor_refresh_interval;

    let nodes = blocking(move || tor::latest_nodes(&dir)).await?;
    Ok(Json(json!({
        "status": "success",
        "nodes": nodes,
        "refresh_interval": refresh_interval,
    })))
}

async fn raw_csv(State(state): State<AppState>, user: CurrentUser) -> Result<Response> {
    user.require(Panel::Tor)?;
    let dir = tor_dir(&state).await?;
    let body = blocking(move || tor::latest_raw(&dir)).await?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

async fn status(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Tor)?;
    let dir = tor_dir(&state).await?;
    let enabled = state.config().await.features.tor_enabled;

    match blocking(move || tor::status(&dir, enabled)).await? {
        Some(status) => Ok(Json(json!({ "status": "success", "data": status }))),
        None => Ok(Json(json!({
            "status": "warning",
            "message": "No Tor CSV files found",
        }))),
    }
}

async fn refresh(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Tor)?;
    let dir = tor_dir(&state).await?;
    let nodes = blocking(move || tor::latest_nodes(&dir)).await?;
    debug!("Tor refresh loaded {} nodes", nodes.len());
    Ok(Json(json!({
        "status": "success",
        "message": "Tor data refreshed",
        "count": nodes.len(),
    })))
}
