//! Folder-size and duplicate-scan panels.

use std::path::PathBuf;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::extract::JsonBody;
use super::response::success;
use super::session::CurrentUser;
use super::{blocking, AppState};
use crate::dupes;
use crate::error::{Error, Result};
use crate::folders::{self, FolderEntry};
use crate::users::Panel;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/folder_size", get(folder_size))
        .route("/data_dupe", get(last_report))
        .route("/data_dupe/start", post(start_scan))
        .route("/data_dupe/delete", post(delete_dupe))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeleteRequest {
    file_path: Option<String>,
}

fn stats_or_empty(root: Option<&PathBuf>) -> Vec<FolderEntry> {
    root.map(|root| folders::folder_stats(root)).unwrap_or_default()
}

async fn folder_size(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::FolderSize)?;
    let paths = state.config().await.paths;

    let (storage, queued) = blocking(move || {
        Ok((
            stats_or_empty(paths.storage_folder.as_ref()),
            stats_or_empty(paths.queued_folder.as_ref()),
        ))
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "storage_folders": storage,
        "queued_folders": queued,
    })))
}

async fn last_report(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::DataDupe)?;
    let report = state.dupe_report.read().await.clone();
    Ok(Json(json!({ "status": "success", "report": report })))
}

async fn dupe_root(state: &AppState) -> Result<PathBuf> {
    state
        .config()
        .await
        .paths
        .dupe_scan_folder
        .ok_or_else(|| Error::not_configured("Duplicate scan folder"))
}

async fn start_scan(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::DataDupe)?;
    let root = dupe_root(&state).await?;

    let report = blocking(move || dupes::scan(&root)).await?;
    info!(
        "{} scanned {} files, {} duplicates",
        user.0.username, report.total_files, report.duplicate_count
    );
    *state.dupe_report.write().await = Some(report.clone());
    Ok(Json(json!({ "status": "success", "report": report })))
}

async fn delete_dupe(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(request): JsonBody<DeleteRequest>,
) -> Result<Json<Value>> {
    user.require(Panel::DataDupe)?;
    let file_path = request
        .file_path
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(Error::MissingField { field: "file_path" })?;
    let root = dupe_root(&state).await?;

    let deleted = file_path.clone();
    blocking(move || dupes::delete_file(&root, &deleted)).await?;
    *state.dupe_report.write().await = None;
    info!("{} deleted {}", user.0.username, file_path.display());
    Ok(success(format!("Deleted {}", file_path.display())))
}
