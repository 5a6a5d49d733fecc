//! Canary Serving - two-slot model serving behind a single nginx ingress
//!
//! An operator pushes a new model version into a staging slot without
//! disturbing the primary slot, steers a fraction (or a header-selected
//! subset) of inference traffic to staging, and forwards inference requests
//! through the ingress.
//!
//! # Architecture
//!
//! - Every slot is a fixed set of five Kubernetes objects (Namespace, Secret,
//!   Deployment, Service, Ingress), isolated by namespace
//! - The routing decision lives entirely in annotations on the staging
//!   Ingress; there is no other state store
//! - All cluster access goes through the [`cluster::ClusterClient`]
//!   capability, constructed once at startup and shared read-only
//!
//! # Error responses
//!
//! Every failed request answers with the error text as a plain body.
//! Validation failures (bad body, wrong model name, wrong vector length,
//! unknown strategy) answer 400 rather than 500. Cluster and backend
//! failures answer 500.
//!
//! # Modules
//!
//! - [`slot`] - Primary / staging slot identity
//! - [`strategy`] - Routing strategy value and its annotation encoding
//! - [`resources`] - Desired resource definitions for a slot
//! - [`cluster`] - Cluster API capability (trait + kube-rs implementation)
//! - [`reconciler`] - Create-or-update of a slot's resource set
//! - [`routing`] - Canary routing controller
//! - [`proxy`] - Inference proxy (reshape + forward)
//! - [`status`] - Read-only slot readiness and strategy snapshot
//! - [`server`] - HTTP surface
//! - [`retry`] - Backoff helpers for optimistic-concurrency conflicts
//! - [`config`] - Command-line / environment configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod proxy;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod routing;
pub mod server;
pub mod slot;
pub mod status;
pub mod strategy;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Fixed Resource Names
// =============================================================================
// Both slots use the same object names; the namespace is what tells them apart.

/// Namespace of the primary slot
pub const PRIMARY_NAMESPACE: &str = "mnist-prod";

/// Namespace of the staging slot
pub const STAGING_NAMESPACE: &str = "mnist-canary";

/// Name of the Ingress in each slot
pub const INGRESS_NAME: &str = "mnist-ingress";

/// Name of the credentials Secret in each slot
pub const SECRET_NAME: &str = "mnist-secret";

/// Name of the serving Deployment in each slot
pub const DEPLOYMENT_NAME: &str = "mnist-deploy";

/// Name of the Service in each slot
pub const SERVICE_NAME: &str = "mnist-svc";

/// Value of the `app` label selecting serving pods
pub const APP_LABEL: &str = "mnist";

/// Model name the serving backend is hard-wired to
pub const EXPECTED_MODEL_NAME: &str = "model";

/// Field manager / managed-by value stamped on created objects
pub const FIELD_MANAGER: &str = "canary-serving";

// =============================================================================
// Ports
// =============================================================================

/// Serving backend HTTP (REST) port, exposed through Service and Ingress
pub const SERVING_HTTP_PORT: i32 = 8501;

/// Serving backend gRPC port, used only by the readiness probe
pub const SERVING_GRPC_PORT: i32 = 8500;

/// Default listen address of the HTTP surface
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

// =============================================================================
// Ingress Annotations
// =============================================================================

/// Enables the nginx canary behaviour on an Ingress (`"true"` / `"false"`)
pub const ANNOTATION_CANARY: &str = "nginx.ingress.kubernetes.io/canary";

/// Header name that routes a request to the canary when set to `always`
pub const ANNOTATION_CANARY_BY_HEADER: &str = "nginx.ingress.kubernetes.io/canary-by-header";

/// Percentage (0-100) of requests routed to the canary
pub const ANNOTATION_CANARY_WEIGHT: &str = "nginx.ingress.kubernetes.io/canary-weight";

/// Path rewrite applied on the primary Ingress
pub const ANNOTATION_REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";

/// Ingress class selector
pub const ANNOTATION_INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

/// Pod template annotation bumped on every redeploy to force a rollout
pub const ANNOTATION_RESTARTED_AT: &str = "canary-serving/restarted-at";

/// Header the inference proxy sends so header-based canary routing applies
pub const CANARY_HEADER: &str = "UseCanary";

/// Value of [`CANARY_HEADER`] meaning "always route to the canary"
pub const CANARY_HEADER_VALUE: &str = "always";
