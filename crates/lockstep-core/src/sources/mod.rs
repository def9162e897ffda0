//! Installation sources.
//!
//! A [`Source`] can list the versions of a provider it offers and describe
//! where to get one version's package for a platform. There are three kinds,
//! chosen per installation call by [`InstallMethod`]:
//!
//! - [`RegistrySource`]: the provider's origin registry, found via service
//!   discovery
//! - [`FilesystemMirrorSource`]: a local directory in the cache layout
//! - [`HttpMirrorSource`]: a remote mirror speaking the network mirror protocol
//!
//! [`MultiSource`] combines them in priority order.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lockstep_schema::{Platform, Provider, Version};
use reqwest::{Client, Url};
use thiserror::Error;

use crate::auth::AuthenticationInput;
use crate::discovery::{DiscoveryError, ServiceDiscovery};

pub mod filesystem;
pub mod http_mirror;
pub mod multi;
pub mod registry;

pub use filesystem::FilesystemMirrorSource;
pub use http_mirror::HttpMirrorSource;
pub use multi::MultiSource;
pub use registry::RegistrySource;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("provider {provider} is not available from {origin}")]
    ProviderNotFound { provider: String, origin: String },

    #[error("provider {provider} v{version} is not available from {origin}")]
    VersionNotFound {
        provider: String,
        version: String,
        origin: String,
    },

    #[error("provider {provider} v{version} does not have a package available for {platform}")]
    PlatformNotSupported {
        provider: String,
        version: String,
        platform: String,
    },

    #[error("unauthorized request to {host}")]
    Unauthorized { host: String },

    #[error("could not query {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Errors that mean "try the next source".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotFound { .. }
                | Self::VersionNotFound { .. }
                | Self::PlatformNotSupported { .. }
        )
    }
}

/// Versions a source offers for one provider.
#[derive(Debug, Clone, Default)]
pub struct VersionList {
    /// Ascending.
    pub versions: Vec<Version>,
    /// Advisory messages from the source, such as deprecation notices.
    pub warnings: Vec<String>,
}

impl VersionList {
    pub fn contains(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }
}

/// Where a package can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    LocalArchive(PathBuf),
    LocalDir(PathBuf),
    Http(Url),
}

impl fmt::Display for PackageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalArchive(p) | Self::LocalDir(p) => write!(f, "{}", p.display()),
            Self::Http(url) => write!(f, "{url}"),
        }
    }
}

/// One installable package.
#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub provider: Provider,
    pub version: Version,
    pub platform: Platform,
    pub location: PackageLocation,
    pub authentication: AuthenticationInput,
}

#[async_trait]
pub trait Source: Send + Sync {
    async fn available_versions(&self, provider: &Provider) -> Result<VersionList, SourceError>;

    async fn package_meta(
        &self,
        provider: &Provider,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError>;

    /// Short label for logs and errors.
    fn describe(&self) -> String;
}

/// How an installation call may obtain packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMethod {
    /// Each provider's origin registry.
    Direct,
    LocalMirror(PathBuf),
    NetworkMirror(Url),
}

/// Build the combined source for an ordered list of methods.
pub fn build_source(
    methods: &[InstallMethod],
    discovery: &Arc<ServiceDiscovery>,
    client: &Client,
) -> MultiSource {
    let sources = methods
        .iter()
        .map(|method| -> Arc<dyn Source> {
            match method {
                InstallMethod::Direct => {
                    Arc::new(RegistrySource::new(Arc::clone(discovery), client.clone()))
                }
                InstallMethod::LocalMirror(dir) => Arc::new(FilesystemMirrorSource::new(dir)),
                InstallMethod::NetworkMirror(url) => Arc::new(HttpMirrorSource::new(
                    url.clone(),
                    discovery.credentials().clone(),
                    client.clone(),
                )),
            }
        })
        .collect();
    MultiSource::new(sources)
}

/// Parse a JSON response body, naming the URL on failure.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    url: &Url,
) -> Result<T, SourceError> {
    let body = resp.bytes().await.map_err(|source| SourceError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|e| SourceError::InvalidResponse {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
