//! User management: dashboard accounts, OpenCTI accounts and presets.

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::extract::{JsonBody, Path, Query};
use super::response::{success, success_with};
use super::session::CurrentUser;
use super::{blocking, AppState};
use crate::error::{Error, Result};
use crate::opencti::{self, NewOpenCtiUser};
use crate::presets::{self, PresetStore, PASSWORD_LEN};
use crate::users::Panel;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/user_mgmt/dashy_users",
            get(list_dashboard_users).post(add_dashboard_user),
        )
        .route(
            "/user_mgmt/dashy_users/{username}",
            delete(remove_dashboard_user),
        )
        .route(
            "/user_mgmt/dashy_users/{username}/panels",
            put(set_panels),
        )
        .route(
            "/user_mgmt/dashy_users/{username}/panels/{panel}",
            post(grant_panel),
        )
        .route(
            "/user_mgmt/opencti_users",
            get(list_opencti_users).post(create_opencti_user),
        )
        .route("/user_mgmt/opencti_users/{id}", delete(delete_opencti_user))
        .route(
            "/user_mgmt/opencti_groups/{group_id}/members",
            post(add_group_member),
        )
        .route("/user_mgmt/presets", get(list_presets).post(add_preset))
        .route("/user_mgmt/presets.csv", get(download_presets))
        .route("/user_mgmt/presets/{username}", delete(remove_preset))
        .route("/user_mgmt/presets/{username}/push", post(push_preset))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewDashboardUser {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PanelsForm {
    panels: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserSearch {
    search: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewUserForm {
    user_email: String,
    name: String,
    password: String,
    firstname: String,
    lastname: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemberForm {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PresetForm {
    username: String,
    email: String,
}

async fn list_dashboard_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = state.user_store().await?;
    let users = blocking(move || store.list()).await?;
    Ok(Json(json!({
        "status": "success",
        "users": users,
        "panels": Panel::ALL.iter().map(Panel::as_str).collect::<Vec<_>>(),
    })))
}

async fn add_dashboard_user(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(form): JsonBody<NewDashboardUser>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = state.user_store().await?;
    let created = blocking(move || store.add(&form.username, &form.password)).await?;
    info!("{} created dashboard user {}", user.0.username, created.username);
    success_with("user", &created)
}

async fn remove_dashboard_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    if username == user.0.username {
        return Err(Error::invalid_input("You cannot remove your own account"));
    }
    let store = state.user_store().await?;
    let name = username.clone();
    if !blocking(move || store.remove(&name)).await? {
        return Err(Error::not_found("user", username));
    }
    state.sessions.remove_user(&username).await;
    Ok(success(format!("User {username} removed")))
}

async fn set_panels(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
    JsonBody(form): JsonBody<PanelsForm>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let mut panels = Vec::with_capacity(form.panels.len());
    for name in &form.panels {
        match name.parse::<Panel>() {
            Ok(panel) => panels.push(panel),
            Err(_) => warn!("Ignoring unknown panel '{name}' for {username}"),
        }
    }

    let store = state.user_store().await?;
    let updated = blocking(move || store.set_panels(&username, &panels)).await?;
    success_with("user", &updated)
}

async fn grant_panel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((username, panel)): Path<(String, String)>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let panel: Panel = panel.parse()?;

    let store = state.user_store().await?;
    let updated = blocking(move || store.append_panel(&username, panel)).await?;
    info!(
        "{} granted '{panel}' to {}",
        user.0.username, updated.username
    );
    success_with("user", &updated)
}

async fn list_opencti_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UserSearch>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let api = state.intel().await?;
    let users = opencti::users_with_groups(api.as_ref(), query.search.trim()).await?;
    success_with("users", &users)
}

async fn create_opencti_user(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(form): JsonBody<NewUserForm>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    if form.name.trim().is_empty() {
        return Err(Error::MissingField { field: "name" });
    }
    if form.password.is_empty() {
        return Err(Error::MissingField { field: "password" });
    }
    presets::validate_email(&form.user_email)?;

    let new_user = NewOpenCtiUser {
        user_email: form.user_email.trim().to_string(),
        name: form.name.trim().to_string(),
        password: form.password,
        firstname: form.firstname,
        lastname: form.lastname,
        description: form.description,
    };
    let id = state.intel().await?.create_user(&new_user).await?;
    info!("{} created OpenCTI user {}", user.0.username, new_user.name);
    Ok(Json(json!({
        "status": "success",
        "message": "User created successfully",
        "id": id,
    })))
}

async fn delete_opencti_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    state.intel().await?.delete_user(&id).await?;
    info!("{} deleted OpenCTI user {id}", user.0.username);
    Ok(success("User deleted successfully"))
}

async fn add_group_member(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<String>,
    JsonBody(form): JsonBody<MemberForm>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    if form.user_id.trim().is_empty() {
        return Err(Error::MissingField { field: "user_id" });
    }
    state
        .intel()
        .await?
        .add_group_member(&group_id, form.user_id.trim())
        .await?;
    info!("{} added {} to group {group_id}", user.0.username, form.user_id);
    Ok(success("User added to group"))
}

async fn preset_store(state: &AppState) -> PresetStore {
    PresetStore::new(state.config().await.preset_file_path())
}

async fn list_presets(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = preset_store(&state).await;
    let presets = blocking(move || store.list()).await?;
    success_with("presets", &presets)
}

async fn add_preset(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(form): JsonBody<PresetForm>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = preset_store(&state).await;
    let preset = blocking(move || store.add(&form.username, &form.email)).await?;
    success_with("preset", &preset)
}

async fn remove_preset(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = preset_store(&state).await;
    let name = username.clone();
    match blocking(move || store.remove(&name)).await? {
        0 => Err(Error::not_found("preset", username)),
        _ => Ok(success(format!("Preset {username} removed"))),
    }
}

async fn download_presets(State(state): State<AppState>, user: CurrentUser) -> Result<Response> {
    user.require(Panel::UserMgmt)?;
    let store = preset_store(&state).await;
    let body = blocking(move || store.raw_csv()).await?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                CONTENT_DISPOSITION,
                "attachment; filename=\"user_template.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

async fn push_preset(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    user.require(Panel::UserMgmt)?;
    let store = preset_store(&state).await;
    let name = username.clone();
    let preset = blocking(move || store.find(&name))
        .await?
        .ok_or_else(|| Error::not_found("preset", username))?;

    let new_user = NewOpenCtiUser {
        user_email: preset.email.clone(),
        name: preset.username.clone(),
        password: presets::random_password(PASSWORD_LEN),
        ..NewOpenCtiUser::default()
    };
    let api = state.intel().await?;
    let id = api.create_user(&new_user).await?;

    let group_id = state.config().await.opencti.connector_group_id;
    let grouped = !group_id.trim().is_empty();
    if grouped {
        api.add_group_member(group_id.trim(), &id).await?;
    }
    info!(
        "{} pushed preset {} to OpenCTI",
        user.0.username, preset.username
    );
    Ok(Json(json!({
        "status": "success",
        "message": format!("User {} created in OpenCTI", preset.username),
        "id": id,
        "added_to_group": grouped,
    })))
}
