//! Manifest and resend panels.

use std::path::PathBuf;

use axum::extract::State;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::extract::{JsonBody, Path, Query};
use super::response::{success, success_with};
use super::session::CurrentUser;
use super::{blocking, AppState};
use crate::error::{Error, Result};
use crate::manifest;
use crate::resend::{self, ResendPaths, ResendRequest};
use crate::users::Panel;

pub(super) fn manifest_routes() -> Router<AppState> {
    Router::new()
        .route("/manifest", get(manifest_files))
        .route("/manifest/compare", get(compare).post(compare_pair))
        .route("/manifest/report", get(report))
}

pub(super) fn resend_routes() -> Router<AppState> {
    Router::new()
        .route("/resend", get(resend_manifests).post(initiate_resend))
        .route("/resend/batch", post(resend_batch))
        .route("/resend/search", post(search_manifest))
        .route("/resend/{ctifeed}/{filename}", delete(delete_queued))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportQuery {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PairRequest {
    source_file: Option<String>,
    target_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchRequest {
    manifest_name: Option<String>,
    search_term: Option<String>,
}

async fn manifest_files(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Manifest)?;
    let paths = state.config().await.paths;

    let (low, high) = blocking(move || {
        let low = match &paths.low_side_manifest_dir {
            Some(dir) => manifest::list_manifest_files(dir)?,
            None => Vec::new(),
        };
        let high = match &paths.high_side_manifest_dir {
            Some(dir) => manifest::list_manifest_files(dir)?,
            None => Vec::new(),
        };
        Ok((low, high))
    })
    .await?;

    Ok(Json(json!({ "status": "success", "low_side": low, "high_side": high })))
}

async fn compare(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::Manifest)?;
    let config = state.config().await;
    let low = config
        .paths
        .low_side_manifest_dir
        .clone()
        .ok_or_else(|| Error::not_configured("Low side manifest directory"))?;
    let high = config
        .paths
        .high_side_manifest_dir
        .clone()
        .ok_or_else(|| Error::not_configured("High side manifest directory"))?;
    let seed = config.manifest.seed_missing_targets;
    let system_type = config.manifest.system_type.clone();

    let (seeded, results) = blocking(move || {
        let seeded = if seed {
            manifest::seed_missing_targets(&low, &high, &system_type)?
        } else {
            Vec::new()
        };
        Ok((seeded, manifest::compare_all(&low, &high)?))
    })
    .await?;

    let missing: usize = results.iter().map(|r| r.differences.len()).sum();
    info!(
        "Compared {} manifests, {missing} rows missing on the high side",
        results.len()
    );
    Ok(Json(json!({
        "status": "success",
        "results": results,
        "seeded": seeded,
    })))
}

async fn compare_pair(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(request): JsonBody<PairRequest>,
) -> Result<Json<Value>> {
    user.require(Panel::Manifest)?;
    let source_file = request
        .source_file
        .filter(|n| !n.trim().is_empty())
        .ok_or(Error::MissingField {
            field: "source_file",
        })?;
    let target_file = request
        .target_file
        .filter(|n| !n.trim().is_empty())
        .ok_or(Error::MissingField {
            field: "target_file",
        })?;
    let (low, high) = manifest_dirs(&state).await?;

    let differences = blocking(move || {
        manifest::compare_pair(&low, &high, &source_file, &target_file)
    })
    .await?;
    success_with("differences", &differences)
}

async fn manifest_dirs(state: &AppState) -> Result<(PathBuf, PathBuf)> {
    let paths = state.config().await.paths;
    let low = paths
        .low_side_manifest_dir
        .ok_or_else(|| Error::not_configured("Low side manifest directory"))?;
    let high = paths
        .high_side_manifest_dir
        .ok_or_else(|| Error::not_configured("High side manifest directory"))?;
    Ok((low, high))
}

async fn report(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Value>> {
    user.require(Panel::Manifest)?;
    let name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(Error::MissingField { field: "name" })?;
    let (low, high) = manifest_dirs(&state).await?;

    let report = blocking(move || {
        let source = manifest::manifest_path(&low, &name)?;
        let target = manifest::manifest_path(&high, &name)?;
        if !source.is_file() {
            return Err(Error::not_found("manifest", name));
        }
        if !target.is_file() {
            return Err(Error::not_found("manifest", manifest::TARGET_MISSING));
        }
        manifest::transfer_report(&source, &target)
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "transfer_status": report.status.to_string(),
        "report": report,
    })))
}

async fn resend_manifests(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::ReSend)?;
    let dir = state.config().await.paths.resend_manifest_dir;
    let files = match dir {
        Some(dir) => blocking(move || manifest::list_manifest_files(&dir)).await?,
        None => Vec::new(),
    };
    success_with("manifests", &files)
}

async fn search_manifest(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(request): JsonBody<SearchRequest>,
) -> Result<Json<Value>> {
    user.require(Panel::ReSend)?;
    let dir = state
        .config()
        .await
        .paths
        .resend_manifest_dir
        .ok_or_else(|| Error::not_configured("Resend manifest directory"))?;

    if let Some(name) = request.manifest_name.filter(|n| !n.trim().is_empty()) {
        let rows = blocking(move || manifest::open_manifest(&dir, name.trim())).await?;
        return success_with("results", &rows);
    }

    let term = request.search_term.unwrap_or_default();
    let hits = blocking(move || manifest::search_manifests(&dir, &term)).await?;
    success_with("results", &hits)
}

async fn initiate_resend(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(request): JsonBody<ResendRequest>,
) -> Result<Json<Value>> {
    user.require(Panel::ReSend)?;
    let paths = ResendPaths::from_config(&state.config().await.paths)?;
    let requested_by = user.0.username.clone();

    let outcome = blocking(move || resend::resend(&request, &paths)).await?;
    info!(
        "{requested_by} resent {} ({} bytes)",
        outcome.target.display(),
        outcome.bytes
    );
    Ok(success("File successfully copied to resend folder"))
}

async fn resend_batch(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(requests): JsonBody<Vec<ResendRequest>>,
) -> Result<Json<Value>> {
    user.require(Panel::ReSend)?;
    if requests.is_empty() {
        return Err(Error::MissingField { field: "files" });
    }
    let paths = ResendPaths::from_config(&state.config().await.paths)?;

    let results = blocking(move || Ok(resend::resend_many(&requests, &paths))).await?;
    let failed = results.iter().filter(|r| r.status != "success").count();
    info!(
        "{} requested {} resends, {failed} failed",
        user.0.username,
        results.len()
    );
    success_with("results", &results)
}

async fn delete_queued(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((ctifeed, filename)): Path<(String, String)>,
) -> Result<Json<Value>> {
    user.require(Panel::ReSend)?;
    let paths = ResendPaths::from_config(&state.config().await.paths)?;

    let removed = blocking(move || resend::delete_queued(&paths, &ctifeed, &filename)).await?;
    info!("{} removed {} from the queue", user.0.username, removed.display());
    Ok(success("Queued file deleted"))
}
