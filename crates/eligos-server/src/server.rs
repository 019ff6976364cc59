use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use eligos_hub::{Dispatcher, HubHandle, HubRuntime};
use eligos_store::{Database, InviteRepo, MessageRepo, SpaceRepo, UserRepo};

use crate::api;
use crate::auth::AuthKeys;
use crate::config::{ConfigError, ServerConfig};
use crate::error::ServerError;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: UserRepo,
    pub spaces: SpaceRepo,
    pub messages: MessageRepo,
    pub invites: InviteRepo,
    pub hub: HubHandle,
    pub auth: Arc<AuthKeys>,
}

impl AppState {
    pub fn new(db: Database, hub: HubHandle, auth: AuthKeys) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            spaces: SpaceRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            invites: InviteRepo::new(db),
            hub,
            auth: Arc::new(auth),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the hub and the HTTP listener. Returns a handle to shut both down.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, ServerError> {
    config.validate()?;
    let secret = config.jwt_secret.as_ref().ok_or(ConfigError::MissingJwtKey)?;
    let auth = AuthKeys::new(secret, config.token_ttl_days, config.bcrypt_cost);

    let dispatcher = Dispatcher::with_message_handler(Arc::new(MessageRepo::new(db.clone())));
    let hub = HubRuntime::start(config.hub.clone(), Arc::new(SpaceRepo::new(db.clone())), dispatcher)?;

    let router = build_router(AppState::new(db, hub.handle(), auth));
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "eligos server started");

    let token = CancellationToken::new();
    let stop = token.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "http server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        grace: config.hub.shutdown_grace(),
        token,
        server,
        hub,
    })
}

/// Handle returned by `start()`: owns the HTTP task and the hub runtime.
pub struct ServerHandle {
    pub port: u16,
    grace: Duration,
    token: CancellationToken,
    server: JoinHandle<()>,
    hub: HubRuntime,
}

impl ServerHandle {
    pub fn hub(&self) -> HubHandle {
        self.hub.handle()
    }

    /// Stop accepting requests, close every live connection, then wait for
    /// in-flight HTTP requests up to the grace period.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.hub.shutdown().await;
        if tokio::time::timeout(self.grace, self.server).await.is_err() {
            warn!("http server did not stop within grace period");
        }
        info!("eligos server stopped");
    }
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "connections": snapshot.connected.len(),
                "stats": snapshot.stats,
            })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down" })),
        ),
    }
}
