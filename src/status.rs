//! Read-only status of both slots and the active routing strategy
//!
//! Reads never fail the caller: any read error is logged and shown as "not
//! ready" or an unknown strategy.

use std::sync::Arc;

use minijinja::{context, Environment};
use serde::Serialize;
use tracing::warn;

use crate::cluster::ClusterClient;
use crate::slot::DeploySlot;
use crate::strategy::RoutingStrategy;
use crate::{Error, Result, DEPLOYMENT_NAME, INGRESS_NAME};

const STATUS_TEMPLATE: &str = include_str!("../templates/status.html");

/// Point-in-time view of the serving system
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Primary Deployment has at least one available replica
    pub primary_ready: bool,
    /// Staging Deployment has at least one available replica
    pub staging_ready: bool,
    /// Strategy decoded from the staging Ingress
    pub strategy: RoutingStrategy,
}

impl StatusSnapshot {
    /// Readiness of one slot
    pub fn is_ready(&self, slot: DeploySlot) -> bool {
        match slot {
            DeploySlot::Primary => self.primary_ready,
            DeploySlot::Staging => self.staging_ready,
        }
    }
}

/// Builds [`StatusSnapshot`]s from the cluster
pub struct StatusReader {
    client: Arc<dyn ClusterClient>,
}

impl StatusReader {
    /// Create a reader over the shared cluster client
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Take a snapshot; never mutates the cluster
    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            primary_ready: self.slot_ready(DeploySlot::Primary).await,
            staging_ready: self.slot_ready(DeploySlot::Staging).await,
            strategy: self.strategy().await,
        }
    }

    async fn slot_ready(&self, slot: DeploySlot) -> bool {
        match self.client.get_deployment(slot.namespace(), DEPLOYMENT_NAME).await {
            Ok(deployment) => deployment
                .and_then(|d| d.status)
                .and_then(|s| s.available_replicas)
                .is_some_and(|available| available >= 1),
            Err(e) => {
                warn!(slot = %slot, error = %e, "failed to read deployment status");
                false
            }
        }
    }

    async fn strategy(&self) -> RoutingStrategy {
        let namespace = DeploySlot::Staging.namespace();
        match self.client.get_ingress(namespace, INGRESS_NAME).await {
            Ok(Some(ingress)) => {
                RoutingStrategy::decode(&ingress.metadata.annotations.unwrap_or_default())
            }
            Ok(None) => RoutingStrategy::None,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "failed to read staging ingress");
                RoutingStrategy::None
            }
        }
    }
}

/// Render the HTML status page
pub fn render_status_page(snapshot: &StatusSnapshot, predict_url: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("status.html", STATUS_TEMPLATE)
        .map_err(template_error)?;

    let slots: Vec<_> = DeploySlot::ALL
        .iter()
        .map(|slot| {
            context! {
                name => slot.to_string(),
                namespace => slot.namespace(),
                ready => snapshot.is_ready(*slot),
            }
        })
        .collect();

    env.get_template("status.html")
        .map_err(template_error)?
        .render(context! {
            slots => slots,
            strategy => snapshot.strategy.to_string(),
            predict_url => predict_url,
        })
        .map_err(template_error)
}

fn template_error(e: minijinja::Error) -> Error {
    Error::internal_with_context("status", format!("status page: {e}"))
}
