//! Provider registry protocol (`providers.v1`).

use std::sync::Arc;

use async_trait::async_trait;
use lockstep_schema::{Platform, Provider, Version};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{PackageLocation, PackageMeta, Source, SourceError, VersionList, read_json};
use crate::auth::{AuthenticationInput, SignedShasums, SigningKey};
use crate::discovery::ServiceDiscovery;
use crate::io::download::{DownloadError, fetch_bytes};

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<VersionEntry>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    filename: String,
    download_url: String,
    shasum: String,
    shasums_url: String,
    shasums_signature_url: String,
    #[serde(default)]
    signing_keys: SigningKeys,
}

#[derive(Debug, Default, Deserialize)]
struct SigningKeys {
    #[serde(default)]
    gpg_public_keys: Vec<GpgKey>,
}

#[derive(Debug, Deserialize)]
struct GpgKey {
    key_id: String,
    #[serde(default)]
    ascii_armor: String,
    #[serde(default)]
    trust_signature: String,
}

/// Queries each provider's origin registry.
#[derive(Debug)]
pub struct RegistrySource {
    discovery: Arc<ServiceDiscovery>,
    client: Client,
}

impl RegistrySource {
    pub fn new(discovery: Arc<ServiceDiscovery>, client: Client) -> Self {
        Self { discovery, client }
    }

    async fn get(&self, provider: &Provider, url: &Url) -> Result<reqwest::Response, SourceError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(token) = self.discovery.credentials().token_for(&provider.hostname) {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|source| SourceError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn provider_url(&self, provider: &Provider, suffix: &str) -> Result<Url, SourceError> {
        let base = self
            .discovery
            .providers_base_url(&provider.hostname)
            .await?;
        let path = format!("{}/{}/{suffix}", provider.namespace, provider.type_);
        base.join(&path).map_err(|e| SourceError::InvalidResponse {
            url: base.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fetches a checksum document. The registry token only goes to the
    /// registry's own origin; any other host gets its own credentials.
    async fn fetch_document(&self, provider: &Provider, url: &Url) -> Result<Vec<u8>, SourceError> {
        let base = self.provider_url(provider, "").await?;
        let credentials = self.discovery.credentials();
        let token = if base.origin() == url.origin() {
            credentials.token_for(&provider.hostname)
        } else {
            credentials.token_for_url(url)
        };
        fetch_bytes(&self.client, url, token)
            .await
            .map(|b| b.to_vec())
            .map_err(|e| match e {
                DownloadError::Http(source) => SourceError::Http {
                    url: url.to_string(),
                    source,
                },
                other => SourceError::InvalidResponse {
                    url: url.to_string(),
                    reason: other.to_string(),
                },
            })
    }
}

fn check_status(
    resp: reqwest::Response,
    provider: &Provider,
    url: &Url,
) -> Result<reqwest::Response, SourceError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized {
            host: provider.hostname.clone(),
        }),
        _ => resp.error_for_status().map_err(|source| SourceError::Http {
            url: url.to_string(),
            source,
        }),
    }
}

#[async_trait]
impl Source for RegistrySource {
    async fn available_versions(&self, provider: &Provider) -> Result<VersionList, SourceError> {
        let url = self.provider_url(provider, "versions").await?;
        let resp = self.get(provider, &url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::ProviderNotFound {
                provider: provider.to_string(),
                origin: provider.hostname.clone(),
            });
        }
        let body: VersionsResponse = read_json(check_status(resp, provider, &url)?, &url).await?;

        let mut versions: Vec<Version> = body
            .versions
            .iter()
            .filter_map(|v| match Version::parse(&v.version) {
                Ok(v) => Some(v),
                Err(_) => {
                    debug!(%provider, version = %v.version, "ignoring unparseable version");
                    None
                }
            })
            .collect();
        versions.sort();
        versions.dedup();

        Ok(VersionList {
            versions,
            warnings: body.warnings,
        })
    }

    async fn package_meta(
        &self,
        provider: &Provider,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError> {
        let suffix = format!("{version}/download/{}/{}", platform.os, platform.arch);
        let url = self.provider_url(provider, &suffix).await?;
        let resp = self.get(provider, &url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::PlatformNotSupported {
                provider: provider.to_string(),
                version: version.to_string(),
                platform: platform.to_string(),
            });
        }
        let body: DownloadResponse = read_json(check_status(resp, provider, &url)?, &url).await?;

        let join = |raw: &str| {
            url.join(raw).map_err(|e| SourceError::InvalidResponse {
                url: url.to_string(),
                reason: format!("invalid URL {raw:?}: {e}"),
            })
        };
        let download_url = join(&body.download_url)?;
        let shasums_url = join(&body.shasums_url)?;
        let signature_url = join(&body.shasums_signature_url)?;

        let document = self.fetch_document(provider, &shasums_url).await?;
        let signature = self.fetch_document(provider, &signature_url).await?;

        Ok(PackageMeta {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            location: PackageLocation::Http(download_url),
            authentication: AuthenticationInput::Signed(SignedShasums {
                filename: body.filename,
                shasum: body.shasum,
                document,
                signature,
                keys: body
                    .signing_keys
                    .gpg_public_keys
                    .into_iter()
                    .map(|k| SigningKey {
                        key_id: k.key_id,
                        ascii_armor: k.ascii_armor,
                        trust_signature: k.trust_signature,
                    })
                    .collect(),
            }),
        })
    }

    fn describe(&self) -> String {
        "provider registry".to_string()
    }
}
