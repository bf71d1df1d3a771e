//! OpenCTI search and the hash-search watchlist.

use axum::extract::State;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::extract::{JsonBody, Path, Query};
use super::response::{success, success_with};
use super::session::CurrentUser;
use super::{blocking, AppState};
use crate::error::{Error, Result};
use crate::opencti;
use crate::users::Panel;
use crate::watchlist::{self, WatchlistStore};

/// Hits returned by the free-text search.
const SEARCH_LIMIT: usize = 50;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/hash_search", get(list_watchlist).post(add_watchlist))
        .route("/hash_search/report", get(report))
        .route("/hash_search/{id}", delete(delete_watchlist))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WatchlistForm {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
    branch_area: String,
    poc: String,
}

async fn search(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>> {
    user.require(Panel::ApiSearch)?;
    let term = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or(Error::MissingField { field: "q" })?;

    let api = state.intel().await?;
    let hits = api.search(&term, SEARCH_LIMIT).await?;
    info!("Search for {term:?} returned {} hits", hits.len());
    success_with("results", &hits)
}

async fn watchlist_store(state: &AppState) -> WatchlistStore {
    WatchlistStore::new(state.config().await.watchlist_file_path())
}

async fn list_watchlist(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::HashSearch)?;
    let store = watchlist_store(&state).await;
    let entries = blocking(move || store.list()).await?;
    success_with("entries", &entries)
}

async fn add_watchlist(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(form): JsonBody<WatchlistForm>,
) -> Result<Json<Value>> {
    user.require(Panel::HashSearch)?;
    let store = watchlist_store(&state).await;
    let entry = blocking(move || {
        store.add(&form.kind, &form.identifier, &form.branch_area, &form.poc)
    })
    .await?;
    success_with("entry", &entry)
}

async fn delete_watchlist(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<Value>> {
    user.require(Panel::HashSearch)?;
    let store = watchlist_store(&state).await;
    if blocking(move || store.delete(id)).await? {
        Ok(success(format!("Entry {id} deleted")))
    } else {
        Err(Error::not_found("watchlist entry", id.to_string()))
    }
}

async fn report(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::HashSearch)?;
    let store = watchlist_store(&state).await;
    let entries = blocking(move || store.list()).await?;

    let api = state.intel().await?;
    let base_url = opencti::base_url(&state.config().await.opencti.url);
    let rows = watchlist::report(api.as_ref(), &base_url, &entries).await;
    let failed = rows.iter().filter(|row| row.error.is_some()).count();
    info!("Watchlist report over {} rows, {failed} failed", rows.len());
    Ok(Json(json!({
        "status": "success",
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "report": rows,
    })))
}
