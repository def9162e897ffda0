//! Service discovery and per-host credentials.
//!
//! A registry host advertises its API endpoints at
//! `https://<host>/.well-known/terraform.json`. Only `providers.v1` matters
//! here. Results are cached for the lifetime of the [`ServiceDiscovery`].

use std::collections::HashMap;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const DISCOVERY_PATH: &str = ".well-known/terraform.json";
const PROVIDERS_SERVICE: &str = "providers.v1";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid registry hostname {0:?}")]
    InvalidHost(String),

    #[error("failed to request discovery document from {host}: {source}")]
    Http {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{host} returned an invalid discovery document: {reason}")]
    InvalidDocument { host: String, reason: String },

    #[error("host {host} does not provide a provider registry")]
    ServiceNotProvided { host: String },
}

/// Bearer tokens keyed by hostname.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    tokens: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, host: impl Into<String>, token: impl Into<String>) -> Self {
        self.insert(host, token);
        self
    }

    pub fn insert(&mut self, host: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(host.into().to_lowercase(), token.into());
    }

    /// Token for `host`, which may carry a `:port` suffix.
    pub fn token_for(&self, host: &str) -> Option<&str> {
        self.tokens.get(&host.to_lowercase()).map(String::as_str)
    }

    /// Token for the host a URL points at.
    pub fn token_for_url(&self, url: &Url) -> Option<&str> {
        let host = url.host_str()?;
        match url.port() {
            Some(port) => self.token_for(&format!("{host}:{port}")),
            None => self.token_for(host),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Resolves registry hostnames to their provider API base URL.
#[derive(Debug)]
pub struct ServiceDiscovery {
    client: Client,
    credentials: Credentials,
    overrides: HashMap<String, Url>,
    cache: Mutex<HashMap<String, Url>>,
}

impl ServiceDiscovery {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            overrides: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Serve discovery for `host` from `root` instead of `https://<host>/`.
    pub fn with_host_override(mut self, host: impl Into<String>, root: Url) -> Self {
        self.overrides.insert(host.into().to_lowercase(), root);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Base URL of the `providers.v1` API on `host`, always ending in `/`.
    pub async fn providers_base_url(&self, host: &str) -> Result<Url, DiscoveryError> {
        let host = host.to_lowercase();
        if let Some(url) = self.cache.lock().await.get(&host) {
            return Ok(url.clone());
        }

        let root = match self.overrides.get(&host) {
            Some(root) => root.clone(),
            None => Url::parse(&format!("https://{host}/"))
                .map_err(|_| DiscoveryError::InvalidHost(host.clone()))?,
        };
        let doc_url = root
            .join(DISCOVERY_PATH)
            .map_err(|_| DiscoveryError::InvalidHost(host.clone()))?;

        let mut request = self
            .client
            .get(doc_url.clone())
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(token) = self.credentials.token_for(&host) {
            request = request.bearer_auth(token);
        }
        let http_err = |source| DiscoveryError::Http {
            host: host.clone(),
            source,
        };
        let resp = request.send().await.map_err(http_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DiscoveryError::ServiceNotProvided { host });
        }
        let resp = resp.error_for_status().map_err(http_err)?;
        let doc: HashMap<String, serde_json::Value> =
            resp.json().await.map_err(|e| DiscoveryError::InvalidDocument {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let Some(raw) = doc.get(PROVIDERS_SERVICE).and_then(serde_json::Value::as_str) else {
            return Err(DiscoveryError::ServiceNotProvided { host });
        };
        let mut base = doc_url
            .join(raw)
            .map_err(|e| DiscoveryError::InvalidDocument {
                host: host.clone(),
                reason: format!("invalid {PROVIDERS_SERVICE} URL {raw:?}: {e}"),
            })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        debug!(%host, base = %base, "discovered provider registry");
        self.cache.lock().await.insert(host, base.clone());
        Ok(base)
    }
}
