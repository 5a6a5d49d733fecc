//! Shared fixtures for cluster-backed tests

use std::sync::Arc;
use std::time::Duration;

use canary_serving::cluster::{ClusterClient, KubeClusterClient};
use canary_serving::reconciler::DeploymentReconciler;
use canary_serving::resources::{CredentialBlob, SlotSpecBuilder, DEFAULT_SERVING_IMAGE};
use canary_serving::retry::RetryConfig;

/// Ingress host written into test Ingress rules
pub const TEST_INGRESS_HOST: &str = "canary-serving.test.local";

/// Connect with the inferred kubeconfig (`KUBECONFIG` or `~/.kube/config`)
pub async fn connect() -> Result<Arc<dyn ClusterClient>, canary_serving::Error> {
    Ok(Arc::new(KubeClusterClient::connect(None).await?))
}

/// Retry settings tuned for a local cluster
pub fn test_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        backoff_multiplier: 2.0,
    }
}

/// Reconciler with a dummy credential payload
pub fn reconciler(client: Arc<dyn ClusterClient>) -> DeploymentReconciler {
    DeploymentReconciler::new(
        client,
        SlotSpecBuilder::new(TEST_INGRESS_HOST, DEFAULT_SERVING_IMAGE),
        CredentialBlob::new(r#"{"type":"service_account","project_id":"test"}"#),
        test_retry(),
    )
}
