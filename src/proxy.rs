//! Inference proxy
//!
//! Takes a flat 28x28 single-channel image, reshapes it into the backend's
//! `[1][28][28][1]` instance tensor and posts it through the shared ingress.
//! Every request carries the canary steering header; the ingress only honors
//! it while the staging-by-header strategy is active.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::resources::PREDICT_PATH;
use crate::{Error, Result, CANARY_HEADER, CANARY_HEADER_VALUE};

/// Image width and height in pixels
pub const IMAGE_WIDTH: usize = 28;

/// Number of values in a flattened image
pub const INPUT_LEN: usize = IMAGE_WIDTH * IMAGE_WIDTH;

/// Signature the backend model is exported with
pub const SIGNATURE_NAME: &str = "serving_default";

/// Default timeout for one inference round trip.
///
/// reqwest applies no timeout of its own, so without this a stalled backend
/// holds the caller's request open until the caller gives up.
pub const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_secs(30);

/// One instance as the backend expects it: batch, rows, columns, channel
pub type ImageTensor = [[[[f32; 1]; IMAGE_WIDTH]; IMAGE_WIDTH]; 1];

/// Reshape a flat row-major image into the instance tensor.
///
/// The value at flat index `j * 28 + k` lands at row `j`, column `k`.
/// Anything but exactly [`INPUT_LEN`] values is rejected.
pub fn reshape(values: &[f32]) -> Result<ImageTensor> {
    if values.len() != INPUT_LEN {
        return Err(Error::validation_field(
            "instance",
            format!("expected {INPUT_LEN} values, got {}", values.len()),
        ));
    }

    let mut tensor: ImageTensor = [[[[0.0; 1]; IMAGE_WIDTH]; IMAGE_WIDTH]; 1];
    for (i, value) in values.iter().enumerate() {
        tensor[0][i / IMAGE_WIDTH][i % IMAGE_WIDTH][0] = *value;
    }
    Ok(tensor)
}

/// Flatten an instance tensor back into row-major order
pub fn flatten(tensor: &ImageTensor) -> Vec<f32> {
    tensor[0].iter().flatten().map(|pixel| pixel[0]).collect()
}

#[derive(Serialize)]
struct PredictEnvelope<'a> {
    signature_name: &'a str,
    instances: [&'a ImageTensor; 1],
}

#[derive(Deserialize)]
struct PredictionsEnvelope {
    predictions: Vec<Vec<f32>>,
}

// =============================================================================
// Transport
// =============================================================================

/// An outgoing POST to the inference backend
#[derive(Clone, Debug, PartialEq)]
pub struct BackendRequest {
    /// Absolute URL
    pub url: String,
    /// Request headers, in send order
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: serde_json::Value,
}

impl BackendRequest {
    /// Value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw backend answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body bytes
    pub body: Vec<u8>,
}

/// HTTP capability used to reach the serving backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// POST `request` and return whatever came back.
    ///
    /// Only transport failures are errors here; status handling is up to the
    /// caller.
    async fn post(&self, request: BackendRequest) -> Result<BackendResponse>;
}

/// [`InferenceTransport`] over a shared `reqwest::Client`
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl InferenceTransport for ReqwestTransport {
    async fn post(&self, request: BackendRequest) -> Result<BackendResponse> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // Content-Type is only defaulted when the caller did not set one
        let response = builder.json(&request.body).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(BackendResponse { status, body })
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Forwards single-image predictions through the ingress
pub struct InferenceProxy {
    transport: Arc<dyn InferenceTransport>,
    predict_url: String,
}

impl InferenceProxy {
    /// Create a proxy posting to `<ingress_url>/predict`
    pub fn new(ingress_url: &str, transport: Arc<dyn InferenceTransport>) -> Self {
        Self {
            transport,
            predict_url: format!("{}{}", ingress_url.trim_end_matches('/'), PREDICT_PATH),
        }
    }

    /// URL predictions are posted to
    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }

    /// Score one image. No retry; the caller owns retry policy.
    #[instrument(skip_all, fields(len = instance.len()))]
    pub async fn predict(&self, instance: &[f32]) -> Result<Vec<f32>> {
        let tensor = reshape(instance)?;
        let body = serde_json::to_value(PredictEnvelope {
            signature_name: SIGNATURE_NAME,
            instances: [&tensor],
        })?;

        let request = BackendRequest {
            url: self.predict_url.clone(),
            headers: vec![
                (CANARY_HEADER.to_string(), CANARY_HEADER_VALUE.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        };
        let response = self.transport.post(request).await?;

        if !(200..300).contains(&response.status) {
            return Err(Error::backend(format!(
                "inference backend returned {}: {}",
                response.status,
                snippet(&response.body)
            )));
        }

        let envelope: PredictionsEnvelope = serde_json::from_slice(&response.body)
            .map_err(|e| Error::backend(format!("malformed inference response: {e}")))?;
        let scores = envelope
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| Error::backend("inference response contained no predictions"))?;

        debug!(classes = scores.len(), "prediction returned");
        Ok(scores)
    }
}

fn snippet(body: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}
