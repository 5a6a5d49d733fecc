//! HTTP surface
//!
//! | Method | Path              | Body                                   |
//! |--------|-------------------|----------------------------------------|
//! | GET    | `/`               | HTML status page                       |
//! | GET    | `/status`         | JSON status snapshot                   |
//! | GET    | `/healthz`        | liveness                               |
//! | POST   | `/model:deploy`   | `{model-base-dir, model-name, is-new-model, num-replicas}` |
//! | PUT    | `/model/strategy` | `{strategy, weight?}`                  |
//! | POST   | `/model:predict`  | JSON array of 784 floats               |
//!
//! Validation failures answer 400, everything else 500, both with the error
//! text as a plain body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{Html, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::cluster::ClusterClient;
use crate::config::ServerConfig;
use crate::proxy::{InferenceProxy, InferenceTransport};
use crate::reconciler::DeploymentReconciler;
use crate::resources::{DeployRequest, SlotSpecBuilder};
use crate::routing::CanaryRouter;
use crate::slot::DeploySlot;
use crate::status::{render_status_page, StatusReader, StatusSnapshot};
use crate::strategy::RoutingStrategy;
use crate::{Error, Result};

/// Body of `POST /model:deploy`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeployBody {
    /// Model storage location
    pub model_base_dir: String,
    /// Model name; must be `model`
    pub model_name: String,
    /// `true` deploys to staging, `false` to primary
    pub is_new_model: bool,
    /// Desired replica count
    pub num_replicas: i32,
}

impl DeployBody {
    /// Validate into a [`DeployRequest`]
    pub fn into_request(self) -> Result<DeployRequest> {
        DeployRequest::new(
            self.model_base_dir,
            self.model_name,
            DeploySlot::from_is_new_model(self.is_new_model),
            self.num_replicas,
        )
    }
}

/// Body of `PUT /model/strategy`
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyBody {
    /// Wire strategy code (0, 1 or 2)
    pub strategy: i64,
    /// Canary weight, required for the weighted strategy
    #[serde(default)]
    pub weight: Option<i64>,
}

/// Shared handler state; every component is built once at startup
#[derive(Clone)]
pub struct AppState {
    reconciler: Arc<DeploymentReconciler>,
    router: Arc<CanaryRouter>,
    proxy: Arc<InferenceProxy>,
    status: Arc<StatusReader>,
}

impl AppState {
    /// Wire all components over the given cluster and backend capabilities
    pub fn new(
        client: Arc<dyn ClusterClient>,
        transport: Arc<dyn InferenceTransport>,
        config: &ServerConfig,
    ) -> Self {
        let builder = SlotSpecBuilder::new(&config.ingress_host, &config.serving_image);
        Self {
            reconciler: Arc::new(DeploymentReconciler::new(
                client.clone(),
                builder,
                config.credentials.clone(),
                config.retry.clone(),
            )),
            router: Arc::new(CanaryRouter::new(client.clone(), config.retry.clone())),
            proxy: Arc::new(InferenceProxy::new(&config.ingress_url, transport)),
            status: Arc::new(StatusReader::new(client)),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/status", get(status_json))
        .route("/healthz", get(|| async { "ok" }))
        .route("/model:deploy", post(deploy))
        .route("/model/strategy", put(set_strategy))
        .route("/model:predict", post(predict))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal_with_context("server", format!("bind {addr}: {e}")))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::internal_with_context("server", e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::validation(format!("invalid request body: {e}")))
}

async fn status_page(State(state): State<AppState>) -> Result<Html<String>> {
    let snapshot = state.status.snapshot().await;
    render_status_page(&snapshot, state.proxy.predict_url()).map(Html)
}

async fn status_json(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot().await)
}

async fn deploy(State(state): State<AppState>, body: Bytes) -> Result<String> {
    let request = parse_body::<DeployBody>(&body)?.into_request()?;
    state.reconciler.deploy(&request).await?;
    Ok(format!("Deployed: {}", request.model_name))
}

async fn set_strategy(State(state): State<AppState>, body: Bytes) -> Result<String> {
    let body: StrategyBody = parse_body(&body)?;
    let strategy = RoutingStrategy::from_wire(body.strategy, body.weight)?;
    state.router.set_strategy(strategy).await
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Json<Vec<f32>>> {
    let instance: Vec<f32> = parse_body(&body)?;
    Ok(Json(state.proxy.predict(&instance).await?))
}
