//! Cluster API capability
//!
//! Everything the reconciler, router and status reader need from the API
//! server goes through [`ClusterClient`]. The production implementation wraps
//! a `kube::Client`; tests use mocks or an in-memory fake. The client is
//! built once at startup and shared read-only across requests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

#[cfg(test)]
use mockall::automock;

use crate::{Error, FIELD_MANAGER};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait abstracting the cluster operations used on slot resources
///
/// Create calls surface "already exists" as an [`Error::Kube`] for which
/// [`Error::is_already_exists`] holds; replace calls surface a stale
/// resourceVersion as [`Error::is_conflict`]. Get calls map 404 to `None`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a cluster-scoped Namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error>;

    /// Create a Secret in `namespace`
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Create a Deployment in `namespace`
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> Result<(), Error>;

    /// Fetch a Deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Replace a Deployment; must carry the resourceVersion it was read at
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error>;

    /// Create a Service in `namespace`
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;

    /// Create an Ingress in `namespace`
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error>;

    /// Fetch an Ingress, `None` if it does not exist
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error>;

    /// Replace an Ingress; must carry the resourceVersion it was read at
    async fn replace_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a kubeconfig path, or the inferred config when `None`
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        Ok(Self::new(create_client(kubeconfig).await?))
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&Self::post_params(), namespace).await?;
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), secret).await?;
        Ok(())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), deployment).await?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let name = object_name(&deployment.metadata)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &Self::post_params(), deployment).await?;
        Ok(())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), service).await?;
        Ok(())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), ingress).await?;
        Ok(())
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error> {
        let name = object_name(&ingress.metadata)?;
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &Self::post_params(), ingress).await?;
        Ok(())
    }
}

fn object_name(
    metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) -> Result<&str, Error> {
    metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("cluster", "object has no name"))
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config)
        .map_err(|e| Error::config(format!("failed to create kube client: {}", e)))
}
