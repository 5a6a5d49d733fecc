//! Cluster-backed stories for canary serving
//!
//! - `slot_lifecycle`: deploying both slots, redeploying, and switching
//!   routing strategies through the real API server
//!
//! Prediction is not covered here; it needs an ingress controller and a
//! serving backend in the cluster.

mod helpers;
mod slot_lifecycle;
