//! Canary routing controller
//!
//! Writes a [`RoutingStrategy`] onto the staging Ingress. The three strategy
//! annotations are always written together in one replace so the ingress
//! controller never observes a half-updated split.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::cluster::ClusterClient;
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::slot::DeploySlot;
use crate::strategy::RoutingStrategy;
use crate::{Error, Result, INGRESS_NAME};

/// Applies routing strategies to the staging slot's Ingress
pub struct CanaryRouter {
    client: Arc<dyn ClusterClient>,
    retry: RetryConfig,
}

impl CanaryRouter {
    /// Create a router over the shared cluster client
    pub fn new(client: Arc<dyn ClusterClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Apply `strategy` and return the confirmation message.
    ///
    /// Fails if the staging Ingress does not exist yet; a staging deploy has
    /// to come first.
    #[instrument(skip(self), fields(strategy = %strategy))]
    pub async fn set_strategy(&self, strategy: RoutingStrategy) -> Result<String> {
        if strategy == RoutingStrategy::None {
            return Err(Error::validation_field(
                "strategy",
                "the none strategy cannot be written",
            ));
        }

        retry_with_backoff_if(&self.retry, "set_strategy", Error::is_conflict, || {
            self.write_strategy(strategy)
        })
        .await?;

        info!(strategy = %strategy, "routing strategy applied");
        Ok(format!("Changed to strategy: {strategy}"))
    }

    async fn write_strategy(&self, strategy: RoutingStrategy) -> Result<()> {
        let namespace = DeploySlot::Staging.namespace();
        let mut ingress = self
            .client
            .get_ingress(namespace, INGRESS_NAME)
            .await?
            .ok_or_else(|| {
                Error::internal_with_context(
                    "routing",
                    format!(
                        "ingress {INGRESS_NAME} not found in {namespace}; \
                         deploy to the staging slot first"
                    ),
                )
            })?;

        strategy.encode(ingress.metadata.annotations.get_or_insert_with(Default::default))?;
        self.client.replace_ingress(namespace, &ingress).await
    }
}
