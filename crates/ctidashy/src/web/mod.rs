//! HTTP layer.
//!
//! One axum router serves every panel as JSON. Handlers stay thin: check the
//! feature toggle and the user's panel, validate the request, then call into
//! the domain modules. File-system work runs on the blocking pool.

mod accounts;
mod auth;
pub mod extract;
mod intel;
pub mod response;
pub mod session;
mod settings;
mod storage;
mod tor;
mod transfer;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Config, SettingsUpdate};
use crate::dupes::DupeReport;
use crate::error::{Error, Result};
use crate::opencti::{IntelApi, IntelBackend};
use crate::users::UserStore;

pub use session::{CurrentUser, SessionStore, SESSION_COOKIE};

/// A feature that can be switched off in the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Manifest comparison.
    Manifest,
    /// Resend of backed-up files.
    Resend,
    /// Tor node data.
    Tor,
}

impl Feature {
    /// Name used in the disabled message.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Manifest => "Manifest",
            Self::Resend => "Resend",
            Self::Tor => "Tor",
        }
    }

    /// Whether the feature is switched on in `config`.
    #[must_use]
    pub fn is_enabled(self, config: &Config) -> bool {
        match self {
            Self::Manifest => config.features.manifest_enabled,
            Self::Resend => config.features.resend_enabled,
            Self::Tor => config.features.tor_enabled,
        }
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<RwLock<Config>>,
    config_path: Arc<PathBuf>,
    sessions: SessionStore,
    dupe_report: Arc<RwLock<Option<DupeReport>>>,
    backend: Arc<dyn IntelBackend>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the state for a loaded configuration.
    ///
    /// `config_path` is where settings saves are written.
    #[must_use]
    pub fn new(config: Config, config_path: PathBuf, backend: Arc<dyn IntelBackend>) -> Self {
        let sessions = SessionStore::new(config.session_ttl());
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: Arc::new(config_path),
            sessions,
            dupe_report: Arc::new(RwLock::new(None)),
            backend,
        }
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Apply a settings form, persist it, and make it current.
    ///
    /// Nothing changes in memory unless the file was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is invalid or cannot be saved.
    pub async fn update_config(&self, update: SettingsUpdate) -> Result<Config> {
        let mut current = self.config.write().await;
        let mut next = current.clone();
        next.apply_update(update);
        next.validate()?;

        let to_save = next.clone();
        let path = self.config_path.as_ref().clone();
        blocking(move || to_save.save_to(&path)).await?;

        *current = next.clone();
        info!("Settings updated");
        Ok(next)
    }

    /// Fail with the disabled response when `feature` is off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureDisabled`].
    pub async fn require_feature(&self, feature: Feature) -> Result<()> {
        if feature.is_enabled(&*self.config.read().await) {
            Ok(())
        } else {
            Err(Error::FeatureDisabled {
                feature: feature.display_name(),
            })
        }
    }

    /// OpenCTI client for the current settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when the URL or key is missing.
    pub async fn intel(&self) -> Result<Arc<dyn IntelApi>> {
        let config = self.config.read().await;
        self.backend.client(&config.opencti)
    }

    /// The backend used to build OpenCTI clients.
    #[must_use]
    pub fn backend(&self) -> &dyn IntelBackend {
        self.backend.as_ref()
    }

    /// Dashboard account store for the current settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the user file cannot be created.
    pub async fn user_store(&self) -> Result<UserStore> {
        let path = self.config().await.user_file_path();
        blocking(move || UserStore::open(path)).await
    }
}

/// Run blocking file-system work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
}

async fn gate(state: &AppState, feature: Feature, request: Request, next: Next) -> Result<Response> {
    state.require_feature(feature).await?;
    Ok(next.run(request).await)
}

async fn manifest_gate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    gate(&state, Feature::Manifest, request, next).await
}

async fn resend_gate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    gate(&state, Feature::Resend, request, next).await
}

async fn tor_gate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    gate(&state, Feature::Tor, request, next).await
}

async fn health() -> &'static str {
    "ok"
}

/// Build the dashboard router.
///
/// Toggleable panels sit behind a gate that answers the disabled response
/// before authentication or request parsing.
pub fn router(state: AppState) -> Router {
    let manifest = transfer::manifest_routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), manifest_gate));
    let resend = transfer::resend_routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), resend_gate));
    let tor = tor::routes().route_layer(middleware::from_fn_with_state(state.clone(), tor_gate));

    Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(manifest)
        .merge(resend)
        .merge(tor)
        .merge(storage::routes())
        .merge(intel::routes())
        .merge(settings::routes())
        .merge(accounts::routes())
        .with_state(state)
}

/// Serve the dashboard until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "ctidashy listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("ctidashy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
