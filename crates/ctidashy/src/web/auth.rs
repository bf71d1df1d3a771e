//! Login, logout and the current user.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::extract::JsonBody;
use super::session::{clear_cookie, session_cookie, session_token, CurrentUser};
use super::{blocking, AppState};
use crate::error::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginForm {
    username: String,
    password: String,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

async fn login(State(state): State<AppState>, JsonBody(form): JsonBody<LoginForm>) -> Result<Response> {
    if form.username.trim().is_empty() {
        return Err(Error::MissingField { field: "username" });
    }
    let store = state.user_store().await?;
    let LoginForm { username, password } = form;
    let user = match blocking(move || store.verify(&username, &password)).await {
        Ok(user) => user,
        Err(e) => {
            if matches!(e, Error::InvalidCredentials) {
                warn!("Failed login attempt");
            }
            return Err(e);
        }
    };

    let token = state.sessions.create(&user.username).await;
    let cookie = session_cookie(&token, state.config().await.session_ttl())?;
    info!("{} logged in", user.username);
    Ok((
        [cookie],
        Json(json!({
            "status": "success",
            "username": user.username,
            "panels": user.panels,
        })),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.remove(&token).await;
    }
    (
        [clear_cookie()],
        Json(json!({ "status": "success", "message": "Logged out" })),
    )
        .into_response()
}

async fn me(user: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "username": user.0.username,
        "panels": user.0.panels,
    }))
}
