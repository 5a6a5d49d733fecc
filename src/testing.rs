//! In-memory cluster used by tests
//!
//! Behaves like the API server for the few calls we make: create fails with
//! 409 AlreadyExists on an existing name, replace fails with 409 Conflict on a
//! stale resourceVersion and with 404 on a missing object.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::cluster::ClusterClient;
use crate::error::api_error;
use crate::Error;

type Key = (String, String);

#[derive(Default)]
struct State {
    next_version: u64,
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    ingresses: BTreeMap<Key, Ingress>,
}

impl State {
    fn stamp(&mut self, metadata: &mut ObjectMeta) {
        self.next_version += 1;
        metadata.resource_version = Some(self.next_version.to_string());
    }
}

/// Stateful fake of the cluster API
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    /// Number of upcoming replace calls to reject as if another writer won
    pending_conflicts: AtomicU32,
    /// Annotations another writer lands on the Ingress just before our next
    /// replace_ingress reaches the store
    racing_ingress_write: Mutex<Option<BTreeMap<String, String>>>,
    replace_calls: AtomicU32,
    ingress_reads: AtomicU32,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` replace calls with 409 Conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Have another writer merge `annotations` into the stored Ingress right
    /// before the next replace_ingress, so that replace carries a stale
    /// resourceVersion
    pub fn race_next_ingress_replace(&self, annotations: BTreeMap<String, String>) {
        *self.racing_ingress_write.lock().unwrap() = Some(annotations);
    }

    pub fn ingress_reads(&self) -> u32 {
        self.ingress_reads.load(Ordering::SeqCst)
    }

    pub fn replace_calls(&self) -> u32 {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.keys().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.namespaces.len() + s.secrets.len() + s.deployments.len() + s.services.len()
            + s.ingresses.len()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        let s = self.state.lock().unwrap();
        s.deployments.get(&key(namespace, name)).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        let s = self.state.lock().unwrap();
        s.secrets.get(&key(namespace, name)).cloned()
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        let s = self.state.lock().unwrap();
        s.ingresses.get(&key(namespace, name)).cloned()
    }

    pub fn ingress_annotations(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.ingress(namespace, name)
            .and_then(|i| i.metadata.annotations)
            .unwrap_or_default()
    }

    /// Simulate the Deployment controller reporting available pods
    pub fn set_available_replicas(&self, namespace: &str, name: &str, available: i32) {
        let mut s = self.state.lock().unwrap();
        if let Some(d) = s.deployments.get_mut(&key(namespace, name)) {
            d.status = Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            });
        }
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn name_of(metadata: &ObjectMeta) -> String {
    metadata.name.clone().unwrap_or_default()
}

fn already_exists(kind: &str, name: &str) -> Error {
    api_error(409, "AlreadyExists", &format!("{kind} \"{name}\" already exists")).into()
}

fn not_found(kind: &str, name: &str) -> Error {
    api_error(404, "NotFound", &format!("{kind} \"{name}\" not found")).into()
}

fn conflict(kind: &str, name: &str) -> Error {
    api_error(
        409,
        "Conflict",
        &format!(
            "Operation cannot be fulfilled on {kind} \"{name}\": \
             the object has been modified"
        ),
    )
    .into()
}

macro_rules! create_namespaced {
    ($self:ident, $map:ident, $kind:literal, $namespace:ident, $obj:ident) => {{
        let mut s = $self.state.lock().unwrap();
        let name = name_of(&$obj.metadata);
        let k = key($namespace, &name);
        if s.$map.contains_key(&k) {
            return Err(already_exists($kind, &name));
        }
        let mut obj = $obj.clone();
        obj.metadata.namespace = Some($namespace.to_string());
        s.stamp(&mut obj.metadata);
        s.$map.insert(k, obj);
        Ok(())
    }};
}

macro_rules! replace_namespaced {
    ($self:ident, $map:ident, $kind:literal, $namespace:ident, $obj:ident) => {{
        $self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let name = name_of(&$obj.metadata);
        if $self.take_conflict() {
            return Err(conflict($kind, &name));
        }
        let mut s = $self.state.lock().unwrap();
        let k = key($namespace, &name);
        let current = match s.$map.get(&k) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(not_found($kind, &name)),
        };
        if current != $obj.metadata.resource_version {
            return Err(conflict($kind, &name));
        }
        let mut obj = $obj.clone();
        s.stamp(&mut obj.metadata);
        s.$map.insert(k, obj);
        Ok(())
    }};
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        let name = name_of(&namespace.metadata);
        if s.namespaces.contains_key(&name) {
            return Err(already_exists("namespaces", &name));
        }
        let mut obj = namespace.clone();
        s.stamp(&mut obj.metadata);
        s.namespaces.insert(name, obj);
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        create_namespaced!(self, secrets, "secrets", namespace, secret)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        create_namespaced!(self, deployments, "deployments", namespace, deployment)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(namespace, name))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        replace_namespaced!(self, deployments, "deployments", namespace, deployment)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        create_namespaced!(self, services, "services", namespace, service)
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error> {
        create_namespaced!(self, ingresses, "ingresses", namespace, ingress)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error> {
        self.ingress_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.ingress(namespace, name))
    }

    async fn replace_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), Error> {
        let racing = self.racing_ingress_write.lock().unwrap().take();
        if let Some(annotations) = racing {
            let mut s = self.state.lock().unwrap();
            let k = key(namespace, &name_of(&ingress.metadata));
            if let Some(mut stored) = s.ingresses.remove(&k) {
                stored
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .extend(annotations);
                s.stamp(&mut stored.metadata);
                s.ingresses.insert(k, stored);
            }
        }
        replace_namespaced!(self, ingresses, "ingresses", namespace, ingress)
    }
}
