//! Canary Serving - two-slot model serving with nginx canary routing

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use canary_serving::cluster::KubeClusterClient;
use canary_serving::config::Config;
use canary_serving::proxy::ReqwestTransport;
use canary_serving::server::{self, AppState};
use canary_serving::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Config::parse();

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = cli
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Built once and shared by every handler; failure here is fatal
    let client = KubeClusterClient::connect(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let transport = ReqwestTransport::new(config.predict_timeout)
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

    info!(
        ingress_host = %config.ingress_host,
        ingress_url = %config.ingress_url,
        image = %config.serving_image,
        "Starting canary serving controller"
    );

    let state = AppState::new(Arc::new(client), Arc::new(transport), &config);
    server::serve(state, config.listen).await?;

    info!("Shut down cleanly");
    Ok(())
}
