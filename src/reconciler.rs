//! Deployment reconciler
//!
//! Drives a slot's resource set toward the desired state described by a
//! [`DeployRequest`]. Objects are handled in a fixed order: both namespaces,
//! then Secret, Deployment, Service, Ingress. Each step tries to create; an
//! "already exists" answer is fine for the immutable objects, triggers an
//! in-place update for the Deployment, and a merge of deploy-owned
//! annotations for the Ingress. Any other error aborts the whole call with no
//! compensation; calling again is the recovery path.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use tracing::{debug, info, instrument};

use crate::cluster::ClusterClient;
use crate::resources::{CredentialBlob, DeployRequest, ResourceSet, SlotSpecBuilder, CONTAINER_NAME};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::slot::DeploySlot;
use crate::{Error, Result, ANNOTATION_RESTARTED_AT, DEPLOYMENT_NAME, INGRESS_NAME};

/// Creates or updates slot resources for deploy requests
pub struct DeploymentReconciler {
    client: Arc<dyn ClusterClient>,
    builder: SlotSpecBuilder,
    credentials: CredentialBlob,
    retry: RetryConfig,
}

impl DeploymentReconciler {
    /// Create a reconciler; `retry` bounds conflict retries on updates
    pub fn new(
        client: Arc<dyn ClusterClient>,
        builder: SlotSpecBuilder,
        credentials: CredentialBlob,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            builder,
            credentials,
            retry,
        }
    }

    /// Materialize or update the resource set for `request`.
    ///
    /// Returns once every object is in the desired state.
    #[instrument(skip(self, request), fields(slot = %request.target_slot))]
    pub async fn deploy(&self, request: &DeployRequest) -> Result<()> {
        let set = self.builder.build(request, &self.credentials);
        let namespace = set.slot.namespace();

        // Both slots always exist so routing can switch at any time
        for slot in DeploySlot::ALL {
            let result = self
                .client
                .create_namespace(&SlotSpecBuilder::namespace(slot))
                .await;
            tolerate_existing(result, "namespace", slot.namespace())?;
        }

        // Credentials are written once; redeploys keep the original payload
        let result = self.client.create_secret(namespace, &set.secret).await;
        tolerate_existing(result, "secret", namespace)?;

        self.apply_deployment(request, &set).await?;

        let result = self.client.create_service(namespace, &set.service).await;
        tolerate_existing(result, "service", namespace)?;

        self.apply_ingress(request, &set).await?;

        info!(
            namespace = %namespace,
            replicas = request.replica_count,
            model_base_path = %request.model_storage_location,
            "slot deployed"
        );
        Ok(())
    }

    async fn apply_deployment(&self, request: &DeployRequest, set: &ResourceSet) -> Result<()> {
        let namespace = set.slot.namespace();
        match self.client.create_deployment(namespace, &set.deployment).await {
            Ok(()) => {
                info!(namespace = %namespace, "deployment created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!(namespace = %namespace, "deployment exists, forcing rolling update");
                retry_with_backoff_if(&self.retry, "update_deployment", Error::is_conflict, || {
                    self.update_deployment(request, namespace)
                })
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// One read-modify-replace pass over the live Deployment
    async fn update_deployment(&self, request: &DeployRequest, namespace: &str) -> Result<()> {
        let mut deployment = self
            .client
            .get_deployment(namespace, DEPLOYMENT_NAME)
            .await?
            .ok_or_else(|| vanished("deployment", namespace))?;

        let spec = deployment
            .spec
            .as_mut()
            .ok_or_else(|| malformed("deployment has no spec", namespace))?;
        spec.replicas = Some(request.replica_count);

        let pod_spec = spec
            .template
            .spec
            .as_mut()
            .ok_or_else(|| malformed("deployment has no pod template spec", namespace))?;
        let container = match pod_spec
            .containers
            .iter()
            .position(|c| c.name == CONTAINER_NAME)
        {
            Some(i) => &mut pod_spec.containers[i],
            None => pod_spec
                .containers
                .first_mut()
                .ok_or_else(|| malformed("deployment has no containers", namespace))?,
        };
        container.env = Some(SlotSpecBuilder::container_env(request));

        let annotations = spec
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default);
        let marker = next_change_marker(
            annotations.get(ANNOTATION_RESTARTED_AT).map(String::as_str),
            chrono::Utc::now().timestamp_millis(),
        );
        debug!(namespace = %namespace, marker = %marker, "stamping change marker");
        annotations.insert(ANNOTATION_RESTARTED_AT.to_string(), marker);

        self.client.replace_deployment(namespace, &deployment).await
    }

    async fn apply_ingress(&self, request: &DeployRequest, set: &ResourceSet) -> Result<()> {
        let namespace = set.slot.namespace();
        match self.client.create_ingress(namespace, &set.ingress).await {
            Ok(()) => {
                info!(namespace = %namespace, "ingress created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                retry_with_backoff_if(&self.retry, "update_ingress", Error::is_conflict, || {
                    self.merge_ingress(request, &set.ingress, namespace)
                })
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// One read-modify-replace pass over the live Ingress.
    ///
    /// Deploy-owned annotations are overwritten; strategy keys written by the
    /// routing controller are kept.
    async fn merge_ingress(
        &self,
        request: &DeployRequest,
        desired: &Ingress,
        namespace: &str,
    ) -> Result<()> {
        let mut ingress = self
            .client
            .get_ingress(namespace, INGRESS_NAME)
            .await?
            .ok_or_else(|| vanished("ingress", namespace))?;

        ingress
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(SlotSpecBuilder::ingress_annotations(request));
        ingress.spec = desired.spec.clone();

        self.client.replace_ingress(namespace, &ingress).await?;
        debug!(namespace = %namespace, "ingress annotations merged");
        Ok(())
    }
}

/// Next value for the rollout change marker.
///
/// Normally the current time in milliseconds, but never less than one past
/// the previous marker so consecutive deploys always change the template.
pub fn next_change_marker(previous: Option<&str>, now_millis: i64) -> String {
    let floor = previous
        .and_then(|p| p.trim().parse::<i64>().ok())
        .map(|p| p.saturating_add(1))
        .unwrap_or(i64::MIN);
    now_millis.max(floor).to_string()
}

fn tolerate_existing(result: Result<()>, kind: &str, namespace: &str) -> Result<()> {
    match result {
        Ok(()) => {
            info!(kind = %kind, namespace = %namespace, "created");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(kind = %kind, namespace = %namespace, "already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn vanished(kind: &str, namespace: &str) -> Error {
    Error::internal_with_context(
        "reconciler",
        format!("{kind} in {namespace} reported as existing but could not be read"),
    )
}

fn malformed(msg: &str, namespace: &str) -> Error {
    Error::internal_with_context("reconciler", format!("{msg} in {namespace}"))
}
