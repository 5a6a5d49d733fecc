//! Stories about how an operator rolls a new model out through the slots
//!
//! All stories share the fixed slot names, so they must run single-threaded.

use canary_serving::resources::DeployRequest;
use canary_serving::routing::CanaryRouter;
use canary_serving::slot::DeploySlot;
use canary_serving::status::StatusReader;
use canary_serving::strategy::RoutingStrategy;
use canary_serving::{
    ANNOTATION_CANARY, ANNOTATION_CANARY_BY_HEADER, ANNOTATION_CANARY_WEIGHT,
    ANNOTATION_RESTARTED_AT, DEPLOYMENT_NAME, INGRESS_NAME, PRIMARY_NAMESPACE, STAGING_NAMESPACE,
};

use super::helpers::{connect, reconciler, test_retry};

fn request(slot: DeploySlot, location: &str, replicas: i32) -> DeployRequest {
    DeployRequest::new(location, "model", slot, replicas).expect("valid request")
}

/// Story: Operator ships a new model next to the current one and shifts
/// traffic in steps
///
/// Expected behavior:
/// - Both slot namespaces exist after the first deploy
/// - Redeploying takes the update path and bumps the change marker
/// - Strategy writes leave exactly the keys of the chosen strategy
/// - The status reader decodes what the router wrote
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_rolls_out_new_model() {
    let client = connect().await.expect("failed to connect to cluster");
    let reconciler = reconciler(client.clone());
    let router = CanaryRouter::new(client.clone(), test_retry());
    let status = StatusReader::new(client.clone());

    // Act: current model into primary, candidate into staging
    reconciler
        .deploy(&request(DeploySlot::Primary, "gs://models/mnist/1", 1))
        .await
        .expect("primary deploy failed");
    reconciler
        .deploy(&request(DeploySlot::Staging, "gs://models/mnist/2", 1))
        .await
        .expect("staging deploy failed");

    let primary = client
        .get_deployment(PRIMARY_NAMESPACE, DEPLOYMENT_NAME)
        .await
        .expect("read primary")
        .expect("primary deployment exists");
    assert_eq!(primary.spec.as_ref().and_then(|s| s.replicas), Some(1));

    // Act: redeploy staging with more replicas
    let marker_before = restarted_at(&client).await;
    reconciler
        .deploy(&request(DeploySlot::Staging, "gs://models/mnist/2", 2))
        .await
        .expect("staging redeploy failed");
    let marker_after = restarted_at(&client).await.expect("marker set after redeploy");
    if let Some(before) = marker_before {
        let (before, after): (i64, i64) = (before.parse().unwrap(), marker_after.parse().unwrap());
        assert!(after > before, "change marker must increase");
    }

    // Act: weighted split, then header-only, then back to current
    router
        .set_strategy(RoutingStrategy::Weighted { weight: 20 })
        .await
        .expect("weighted");
    let a = staging_annotations(&client).await;
    assert_eq!(a.get(ANNOTATION_CANARY_WEIGHT).map(String::as_str), Some("20"));
    assert_eq!(
        status.snapshot().await.strategy,
        RoutingStrategy::Weighted { weight: 20 }
    );

    router
        .set_strategy(RoutingStrategy::StagingSlotOnly)
        .await
        .expect("staging only");
    let a = staging_annotations(&client).await;
    assert_eq!(a.get(ANNOTATION_CANARY_BY_HEADER).map(String::as_str), Some("UseCanary"));
    assert!(!a.contains_key(ANNOTATION_CANARY_WEIGHT));

    router
        .set_strategy(RoutingStrategy::CurrentSlotOnly)
        .await
        .expect("current only");
    let a = staging_annotations(&client).await;
    assert_eq!(a.get(ANNOTATION_CANARY).map(String::as_str), Some("false"));
    assert!(!a.contains_key(ANNOTATION_CANARY_BY_HEADER));
    assert!(!a.contains_key(ANNOTATION_CANARY_WEIGHT));
    assert_eq!(status.snapshot().await.strategy, RoutingStrategy::CurrentSlotOnly);
}

async fn restarted_at(
    client: &std::sync::Arc<dyn canary_serving::cluster::ClusterClient>,
) -> Option<String> {
    client
        .get_deployment(STAGING_NAMESPACE, DEPLOYMENT_NAME)
        .await
        .ok()??
        .spec?
        .template
        .metadata?
        .annotations?
        .remove(ANNOTATION_RESTARTED_AT)
}

async fn staging_annotations(
    client: &std::sync::Arc<dyn canary_serving::cluster::ClusterClient>,
) -> std::collections::BTreeMap<String, String> {
    client
        .get_ingress(STAGING_NAMESPACE, INGRESS_NAME)
        .await
        .expect("read staging ingress")
        .expect("staging ingress exists")
        .metadata
        .annotations
        .unwrap_or_default()
}
