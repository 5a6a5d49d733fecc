//! Error types for canary serving
//!
//! Errors fall into four groups: request validation (rejected before any
//! external call), cluster API errors, inference backend errors, and
//! internal/configuration failures. Cluster API errors carry the kube-rs
//! source so callers can tell "already exists" and "conflict" apart from
//! real failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for canary serving operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid request (bad body, wrong model name, wrong vector length, ...)
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending request field, if known
        field: Option<String>,
    },

    /// Inference backend answered, but not with usable predictions
    #[error("backend error: {message}")]
    Backend {
        /// Description of what failed
        message: String,
    },

    /// Inference backend could not be reached or its answer not read
    #[error("backend transport error: {}", source_chain(.source))]
    Transport {
        /// The underlying reqwest error
        #[source]
        source: reqwest::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Startup configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "reconciler", "server")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a backend error with the given message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for request validation errors
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True when a create call hit an existing object (409 AlreadyExists)
    pub fn is_already_exists(&self) -> bool {
        self.api_status()
            .is_some_and(|(code, reason)| code == 409 && reason == "AlreadyExists")
    }

    /// True when an update carried a stale resourceVersion (409 Conflict)
    pub fn is_conflict(&self) -> bool {
        self.api_status()
            .is_some_and(|(code, reason)| code == 409 && reason == "Conflict")
    }

    /// True when the requested object does not exist (404)
    pub fn is_not_found(&self) -> bool {
        self.api_status().is_some_and(|(code, _)| code == 404)
    }

    fn api_status(&self) -> Option<(u16, &str)> {
        match self {
            Self::Kube {
                source: kube::Error::Api(ae),
            } => Some((ae.code, ae.reason.as_str())),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}

/// Render an error and every cause below it, outermost first
pub fn source_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cause = e.source();
    }
    out
}

/// Validation failures answer 400 Bad Request; every other error answers 500
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, self.to_string()).into_response()
    }
}

/// Build a kube API error response, as the API server would return it.
#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: create on an existing object is recognised so reconcile can
    /// take the update branch instead of failing
    #[test]
    fn story_already_exists_is_distinguished_from_conflict() {
        let exists: Error =
            api_error(409, "AlreadyExists", "deployments \"mnist-deploy\" already exists").into();
        assert!(exists.is_already_exists());
        assert!(!exists.is_conflict());

        let conflict: Error = api_error(409, "Conflict", "the object has been modified").into();
        assert!(conflict.is_conflict());
        assert!(!conflict.is_already_exists());

        let missing: Error =
            api_error(404, "NotFound", "ingresses \"mnist-ingress\" not found").into();
        assert!(missing.is_not_found());
        assert!(!missing.is_already_exists());
    }

    /// Story: non-API errors never classify as cluster conditions
    #[test]
    fn story_non_kube_errors_have_no_api_status() {
        let err = Error::backend("connection refused");
        assert!(!err.is_already_exists());
        assert!(!err.is_conflict());
        assert!(!err.is_not_found());
    }

    /// Story: validation errors map to a client error, everything else to 500
    #[test]
    fn story_http_status_mapping() {
        let resp =
            Error::validation_field("model-name", "model name must be \"model\"").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = Error::from(api_error(500, "InternalError", "etcd unavailable")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = Error::backend("503 from ingress").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Layer(&'static str, #[source] Option<Box<Layer>>);

    #[test]
    fn test_source_chain_lists_every_cause() {
        let err = Layer(
            "error sending request",
            Some(Box::new(Layer(
                "client error (Connect)",
                Some(Box::new(Layer("connection refused", None))),
            ))),
        );
        assert_eq!(
            source_chain(&err),
            "error sending request: client error (Connect): connection refused"
        );
        assert_eq!(source_chain(&Layer("alone", None)), "alone");
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = Error::internal_with_context("server", "listener closed");
        assert_eq!(err.to_string(), "internal error [server]: listener closed");

        let err = Error::validation("weight missing");
        assert_eq!(err.to_string(), "validation error: weight missing");
    }
}
