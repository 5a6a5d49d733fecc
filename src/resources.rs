//! Desired resource definitions for a slot
//!
//! Building is pure: a validated [`DeployRequest`] plus the credential blob
//! yields the five objects that make a slot live. Nothing here talks to the
//! cluster and nothing here can fail; validation happens in
//! [`DeployRequest::new`].

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, KeyToPath, Namespace, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, TCPSocketAction, Volume,
    VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use crate::slot::DeploySlot;
use crate::{
    Error, Result, ANNOTATION_CANARY, ANNOTATION_INGRESS_CLASS, ANNOTATION_REWRITE_TARGET,
    APP_LABEL, DEPLOYMENT_NAME, EXPECTED_MODEL_NAME, FIELD_MANAGER, INGRESS_NAME, SECRET_NAME,
    SERVICE_NAME, SERVING_GRPC_PORT, SERVING_HTTP_PORT,
};

/// Default serving backend image
pub const DEFAULT_SERVING_IMAGE: &str = "tensorflow/serving:latest";

/// Name of the serving container
pub const CONTAINER_NAME: &str = "tensorflow-serving";

/// Secret key holding the credential payload
pub const CREDENTIALS_SECRET_KEY: &str = "sa_json";

/// Directory the credentials Secret is mounted at
pub const CREDENTIALS_MOUNT_DIR: &str = "/etc/gcp";

/// File name of the projected credential inside the mount
pub const CREDENTIALS_FILE_NAME: &str = "sa_credentials.json";

/// In-container credential path handed to the backend
pub const CREDENTIALS_PATH: &str = "/etc/gcp/sa_credentials.json";

/// Ingress path the inference proxy posts to
pub const PREDICT_PATH: &str = "/predict";

/// Env var naming the model storage location
pub const ENV_MODEL_BASE_PATH: &str = "MODEL_BASE_PATH";

/// Env var naming the model
pub const ENV_MODEL_NAME: &str = "MODEL_NAME";

/// Env var naming the credential file
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const CREDENTIALS_VOLUME: &str = "google-app-creds-vol";
const READINESS_INITIAL_DELAY_SECS: i32 = 5;
const READINESS_PERIOD_SECS: i32 = 10;
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// =============================================================================
// Inputs
// =============================================================================

/// A validated request to deploy a model into a slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployRequest {
    /// Where the serving backend loads the model from (e.g. `gs://bucket/model/1`)
    pub model_storage_location: String,
    /// Model name; always [`EXPECTED_MODEL_NAME`]
    pub model_name: String,
    /// Slot to deploy into
    pub target_slot: DeploySlot,
    /// Desired pod count
    pub replica_count: i32,
}

impl DeployRequest {
    /// Validate and build a deploy request.
    ///
    /// The serving path is hard-wired to a single model name, so any other
    /// name is rejected before the cluster is touched.
    pub fn new(
        model_storage_location: impl Into<String>,
        model_name: impl Into<String>,
        target_slot: DeploySlot,
        replica_count: i32,
    ) -> Result<Self> {
        let model_storage_location = model_storage_location.into();
        let model_name = model_name.into();

        if model_name != EXPECTED_MODEL_NAME {
            return Err(Error::validation_field(
                "model-name",
                format!(
                    "the model name should be set to \"{EXPECTED_MODEL_NAME}\", \
                     got \"{model_name}\""
                ),
            ));
        }
        if model_storage_location.trim().is_empty() {
            return Err(Error::validation_field(
                "model-base-dir",
                "model storage location must not be empty",
            ));
        }
        if replica_count < 0 {
            return Err(Error::validation_field(
                "num-replicas",
                format!("replica count must be >= 0, got {replica_count}"),
            ));
        }

        Ok(Self {
            model_storage_location,
            model_name,
            target_slot,
            replica_count,
        })
    }
}

/// Credential payload projected into every slot's Secret.
///
/// Read once at startup and never changed afterwards. The raw bytes go into
/// the Secret's `data` map, which the API carries base64-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBlob(Vec<u8>);

impl CredentialBlob {
    /// Wrap raw credential bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw credential bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBlob({} bytes)", self.0.len())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// The five objects that together make a slot live
#[derive(Clone, Debug)]
pub struct ResourceSet {
    /// Slot the set belongs to
    pub slot: DeploySlot,
    /// The slot's namespace
    pub namespace: Namespace,
    /// Credentials Secret
    pub secret: Secret,
    /// Serving Deployment
    pub deployment: Deployment,
    /// ClusterIP Service in front of the Deployment
    pub service: Service,
    /// nginx Ingress routing `/predict` to the Service
    pub ingress: Ingress,
}

/// Builds [`ResourceSet`]s for deploy requests
#[derive(Clone, Debug)]
pub struct SlotSpecBuilder {
    ingress_host: String,
    image: String,
}

impl SlotSpecBuilder {
    /// Create a builder for the given ingress host (no scheme) and image
    pub fn new(ingress_host: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            ingress_host: ingress_host.into(),
            image: image.into(),
        }
    }

    /// Build the full resource set for a request
    pub fn build(&self, request: &DeployRequest, credentials: &CredentialBlob) -> ResourceSet {
        let slot = request.target_slot;
        ResourceSet {
            slot,
            namespace: Self::namespace(slot),
            secret: self.secret(slot, credentials),
            deployment: self.deployment(request),
            service: self.service(slot),
            ingress: self.ingress(request),
        }
    }

    /// Namespace object for a slot
    pub fn namespace(slot: DeploySlot) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(slot.namespace().to_string()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Container env for a request; also what a redeploy writes back
    pub fn container_env(request: &DeployRequest) -> Vec<EnvVar> {
        vec![
            env_var(ENV_MODEL_BASE_PATH, &request.model_storage_location),
            env_var(ENV_MODEL_NAME, &request.model_name),
            env_var(ENV_CREDENTIALS, CREDENTIALS_PATH),
        ]
    }

    /// Annotations the deploy path owns on a slot's Ingress.
    ///
    /// Staging always turns the canary on; primary gets the rewrite target
    /// instead. Strategy split keys are never part of this set.
    pub fn ingress_annotations(request: &DeployRequest) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_INGRESS_CLASS.to_string(), "nginx".to_string());
        match request.target_slot {
            DeploySlot::Staging => {
                annotations.insert(ANNOTATION_CANARY.to_string(), "true".to_string());
            }
            DeploySlot::Primary => {
                annotations.insert(
                    ANNOTATION_REWRITE_TARGET.to_string(),
                    format!("/v1/models/{}:predict", request.model_name),
                );
            }
        }
        annotations
    }

    fn secret(&self, slot: DeploySlot, credentials: &CredentialBlob) -> Secret {
        Secret {
            metadata: object_meta(SECRET_NAME, slot),
            data: Some(BTreeMap::from([(
                CREDENTIALS_SECRET_KEY.to_string(),
                ByteString(credentials.as_bytes().to_vec()),
            )])),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    fn deployment(&self, request: &DeployRequest) -> Deployment {
        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.image.clone()),
            ports: Some(vec![ContainerPort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                container_port: SERVING_HTTP_PORT,
                ..Default::default()
            }]),
            env: Some(Self::container_env(request)),
            volume_mounts: Some(vec![VolumeMount {
                name: CREDENTIALS_VOLUME.to_string(),
                mount_path: CREDENTIALS_MOUNT_DIR.to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(SERVING_GRPC_PORT),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(READINESS_INITIAL_DELAY_SECS),
                period_seconds: Some(READINESS_PERIOD_SECS),
                ..Default::default()
            }),
            ..Default::default()
        };

        Deployment {
            metadata: object_meta(DEPLOYMENT_NAME, request.target_slot),
            spec: Some(DeploymentSpec {
                replicas: Some(request.replica_count),
                selector: LabelSelector {
                    match_labels: Some(app_labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(app_labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![Volume {
                            name: CREDENTIALS_VOLUME.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(SECRET_NAME.to_string()),
                                items: Some(vec![KeyToPath {
                                    key: CREDENTIALS_SECRET_KEY.to_string(),
                                    path: CREDENTIALS_FILE_NAME.to_string(),
                                    ..Default::default()
                                }]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(&self, slot: DeploySlot) -> Service {
        Service {
            metadata: object_meta(SERVICE_NAME, slot),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(app_labels()),
                ports: Some(vec![ServicePort {
                    protocol: Some("TCP".to_string()),
                    port: SERVING_HTTP_PORT,
                    target_port: Some(IntOrString::Int(SERVING_HTTP_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ingress(&self, request: &DeployRequest) -> Ingress {
        let mut metadata = object_meta(INGRESS_NAME, request.target_slot);
        metadata.annotations = Some(Self::ingress_annotations(request));

        Ingress {
            metadata,
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(self.ingress_host.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some(PREDICT_PATH.to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: SERVICE_NAME.to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(SERVING_HTTP_PORT),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn object_meta(name: &str, slot: DeploySlot) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(slot.namespace().to_string()),
        labels: Some(managed_labels()),
        ..Default::default()
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string())])
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), APP_LABEL.to_string())])
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
