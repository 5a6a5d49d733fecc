//! Runtime configuration
//!
//! Parsed from flags with environment fallbacks, then validated once at
//! startup into a [`ServerConfig`]. The credential file is read here and
//! never again.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::proxy::DEFAULT_PREDICT_TIMEOUT;
use crate::resources::{CredentialBlob, DEFAULT_SERVING_IMAGE};
use crate::retry::{RetryConfig, DEFAULT_CONFLICT_ATTEMPTS};
use crate::{Error, Result, DEFAULT_LISTEN_ADDR};

/// Two-slot model serving with nginx canary routing
#[derive(Parser, Debug, Clone)]
#[command(name = "canary-serving", version, about, long_about = None)]
pub struct Config {
    /// Path to a kubeconfig file; in-cluster or inferred config when absent
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Service-account credential file projected into every slot
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS_FILE")]
    pub credentials_file: PathBuf,

    /// Public ingress host, with or without scheme (defaults to http)
    #[arg(long, env = "INGRESS_HOST")]
    pub ingress_host: String,

    /// Address the HTTP surface listens on
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Serving backend container image
    #[arg(long, env = "SERVING_IMAGE", default_value = DEFAULT_SERVING_IMAGE)]
    pub serving_image: String,

    /// Attempts for updates rejected with a stale resourceVersion
    #[arg(long, env = "CONFLICT_RETRIES", default_value_t = DEFAULT_CONFLICT_ATTEMPTS)]
    pub conflict_retries: u32,

    /// Timeout for one inference round trip, in seconds
    #[arg(
        long,
        env = "PREDICT_TIMEOUT_SECS",
        default_value_t = DEFAULT_PREDICT_TIMEOUT.as_secs()
    )]
    pub predict_timeout_secs: u64,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Validated configuration the server is built from
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Kubeconfig override
    pub kubeconfig: Option<PathBuf>,
    /// Credential payload for slot Secrets
    pub credentials: CredentialBlob,
    /// Host written into Ingress rules (no scheme, no port)
    pub ingress_host: String,
    /// Base URL the inference proxy posts to
    pub ingress_url: String,
    /// Listen address
    pub listen: SocketAddr,
    /// Serving backend image
    pub serving_image: String,
    /// Conflict retry policy
    pub retry: RetryConfig,
    /// Inference request timeout
    pub predict_timeout: Duration,
}

impl Config {
    /// Check values and load the credential file
    pub fn validate(&self) -> Result<ServerConfig> {
        let (ingress_host, ingress_url) = parse_ingress_host(&self.ingress_host)?;

        if self.serving_image.trim().is_empty() {
            return Err(Error::config("serving image must not be empty"));
        }
        if self.conflict_retries == 0 {
            return Err(Error::config("conflict retries must be at least 1"));
        }
        if self.predict_timeout_secs == 0 {
            return Err(Error::config("predict timeout must be at least 1 second"));
        }

        Ok(ServerConfig {
            kubeconfig: self.kubeconfig.clone(),
            credentials: load_credentials(&self.credentials_file)?,
            ingress_host,
            ingress_url,
            listen: self.listen,
            serving_image: self.serving_image.trim().to_string(),
            retry: RetryConfig::with_max_attempts(self.conflict_retries),
            predict_timeout: Duration::from_secs(self.predict_timeout_secs),
        })
    }
}

/// Split a configured host into the Ingress rule host and the proxy base URL.
///
/// `serving.example.org` becomes (`serving.example.org`,
/// `http://serving.example.org`); an explicit scheme is kept.
pub fn parse_ingress_host(raw: &str) -> Result<(String, String)> {
    let raw = raw.trim().trim_end_matches('/');
    if raw.is_empty() {
        return Err(Error::config("ingress host must not be empty"));
    }

    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("http".to_string(), raw),
    };
    if scheme != "http" && scheme != "https" {
        return Err(Error::config(format!(
            "ingress host scheme must be http or https, got {scheme}"
        )));
    }

    let authority = rest.split('/').next().unwrap_or_default();
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if is_port(port) => host,
        _ => authority,
    };
    if host.is_empty() {
        return Err(Error::config(format!("ingress host {raw} has no host name")));
    }

    Ok((host.to_string(), format!("{scheme}://{rest}")))
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Read the credential file; missing, unreadable or empty files are errors
pub fn load_credentials(path: &std::path::Path) -> Result<CredentialBlob> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::config(format!("failed to read credentials file {}: {e}", path.display()))
    })?;
    if bytes.is_empty() {
        return Err(Error::config(format!(
            "credentials file {} is empty",
            path.display()
        )));
    }
    Ok(CredentialBlob::new(bytes))
}
