//! Network mirror protocol.
//!
//! ```text
//! GET <base>/<host>/<namespace>/<type>/index.json    {"versions": {"1.0.0": {}}}
//! GET <base>/<host>/<namespace>/<type>/<ver>.json    {"archives": {"linux_amd64": {"url": "...", "hashes": [...]}}}
//! ```
//!
//! Archive URLs may be relative to the document that names them.

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use lockstep_schema::{PackageHash, Platform, Provider, Version};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{PackageLocation, PackageMeta, Source, SourceError, VersionList, read_json};
use crate::auth::AuthenticationInput;
use crate::discovery::Credentials;

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    versions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    archives: BTreeMap<String, Archive>,
}

#[derive(Debug, Deserialize)]
struct Archive {
    url: String,
    #[serde(default)]
    hashes: Vec<String>,
}

/// Checks that `url` is usable as a mirror base: `https`, or `http` on a
/// loopback host.
pub fn validate_mirror_url(url: &Url) -> Result<(), String> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        "http" => Err(format!(
            "network mirror {url} must use https (http is only allowed for localhost)"
        )),
        other => Err(format!("network mirror {url} uses unsupported scheme {other:?}")),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

/// A remote provider mirror.
#[derive(Debug, Clone)]
pub struct HttpMirrorSource {
    base: Url,
    credentials: Credentials,
    client: Client,
}

impl HttpMirrorSource {
    pub fn new(mut base: Url, credentials: Credentials, client: Client) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            base,
            credentials,
            client,
        }
    }

    fn url_for(&self, provider: &Provider, file: &str) -> Result<Url, SourceError> {
        let rel = format!(
            "{}/{}/{}/{file}",
            provider.hostname, provider.namespace, provider.type_
        );
        self.base.join(&rel).map_err(|e| SourceError::InvalidResponse {
            url: self.base.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET a document, returning `None` on 404.
    async fn get(&self, url: &Url) -> Result<Option<reqwest::Response>, SourceError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(token) = self.credentials.token_for_url(&self.base) {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|source| SourceError::Http {
            url: url.to_string(),
            source,
        })?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized {
                host: url.host_str().unwrap_or_default().to_string(),
            }),
            _ => resp
                .error_for_status()
                .map(Some)
                .map_err(|source| SourceError::Http {
                    url: url.to_string(),
                    source,
                }),
        }
    }
}

#[async_trait]
impl Source for HttpMirrorSource {
    async fn available_versions(&self, provider: &Provider) -> Result<VersionList, SourceError> {
        let url = self.url_for(provider, "index.json")?;
        let Some(resp) = self.get(&url).await? else {
            return Err(SourceError::ProviderNotFound {
                provider: provider.to_string(),
                origin: self.describe(),
            });
        };
        let index: IndexResponse = read_json(resp, &url).await?;

        let mut versions: Vec<Version> = index
            .versions
            .keys()
            .filter_map(|raw| {
                Version::parse(raw)
                    .inspect_err(|_| debug!(%provider, version = %raw, "ignoring unparseable version"))
                    .ok()
            })
            .collect();
        versions.sort();
        Ok(VersionList {
            versions,
            warnings: Vec::new(),
        })
    }

    async fn package_meta(
        &self,
        provider: &Provider,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError> {
        let url = self.url_for(provider, &format!("{version}.json"))?;
        let Some(resp) = self.get(&url).await? else {
            return Err(SourceError::VersionNotFound {
                provider: provider.to_string(),
                version: version.to_string(),
                origin: self.describe(),
            });
        };
        let body: VersionResponse = read_json(resp, &url).await?;

        let Some(archive) = body.archives.get(&platform.to_string()) else {
            return Err(SourceError::PlatformNotSupported {
                provider: provider.to_string(),
                version: version.to_string(),
                platform: platform.to_string(),
            });
        };
        let location = url.join(&archive.url).map_err(|e| SourceError::InvalidResponse {
            url: url.to_string(),
            reason: format!("invalid archive URL {:?}: {e}", archive.url),
        })?;

        let mut hashes = Vec::with_capacity(archive.hashes.len());
        for raw in &archive.hashes {
            match PackageHash::parse(raw) {
                Ok((hash, _)) => hashes.push(hash),
                Err(reason) => {
                    return Err(SourceError::InvalidResponse {
                        url: url.to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(PackageMeta {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            location: PackageLocation::Http(location),
            authentication: AuthenticationInput::Hashes(hashes),
        })
    }

    fn describe(&self) -> String {
        format!("network mirror {}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn null() -> Provider {
        Provider::parse("hashicorp/null").unwrap()
    }

    fn source(server: &mockito::ServerGuard) -> HttpMirrorSource {
        let base = Url::parse(&format!("{}/mirror", server.url())).unwrap();
        let creds = Credentials::new().with_token(
            format!("127.0.0.1:{}", base.port().unwrap_or_default()),
            "mirror-token",
        );
        HttpMirrorSource::new(base, creds, Client::new())
    }

    #[tokio::test]
    async fn test_index_and_version_documents() {
        let mut server = Server::new_async().await;
        let index = server
            .mock("GET", "/mirror/registry.terraform.io/hashicorp/null/index.json")
            .match_header("authorization", "Bearer mirror-token")
            .with_status(200)
            .with_body(r#"{"versions": {"3.2.1": {}, "3.1.0": {}}}"#)
            .create_async()
            .await;
        let _version = server
            .mock("GET", "/mirror/registry.terraform.io/hashicorp/null/3.2.1.json")
            .with_status(200)
            .with_body(
                r#"{"archives": {"linux_amd64": {
                    "url": "terraform-provider-null_3.2.1_linux_amd64.zip",
                    "hashes": ["h1:abc="]
                }}}"#,
            )
            .create_async()
            .await;

        let source = source(&server);
        let list = source.available_versions(&null()).await.unwrap();
        assert_eq!(list.versions, vec![Version::new(3, 1, 0), Version::new(3, 2, 1)]);
        index.assert_async().await;

        let meta = source
            .package_meta(&null(), &Version::new(3, 2, 1), &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        let PackageLocation::Http(url) = &meta.location else {
            panic!("expected http location");
        };
        assert_eq!(
            url.as_str(),
            format!(
                "{}/mirror/registry.terraform.io/hashicorp/null/terraform-provider-null_3.2.1_linux_amd64.zip",
                server.url()
            )
        );
        let AuthenticationInput::Hashes(hashes) = &meta.authentication else {
            panic!("expected hashes");
        };
        assert_eq!(hashes, &vec![PackageHash::new("h1:abc=")]);

        let err = source
            .package_meta(&null(), &Version::new(3, 2, 1), &Platform::new("windows", "386"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::PlatformNotSupported { .. }));
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/mirror/registry.terraform.io/hashicorp/null/index.json")
            .with_status(404)
            .create_async()
            .await;

        let err = source(&server).available_versions(&null()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_errors_are_not_not_found() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/mirror/registry.terraform.io/hashicorp/null/index.json")
            .with_status(500)
            .create_async()
            .await;

        let err = source(&server).available_versions(&null()).await.unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn mirror_url_rules() {
        assert!(validate_mirror_url(&Url::parse("https://mirror.example.com/").unwrap()).is_ok());
        assert!(validate_mirror_url(&Url::parse("http://localhost:8080/").unwrap()).is_ok());
        assert!(validate_mirror_url(&Url::parse("http://127.0.0.1/").unwrap()).is_ok());
        assert!(validate_mirror_url(&Url::parse("http://[::1]:80/").unwrap()).is_ok());
        assert!(validate_mirror_url(&Url::parse("http://mirror.example.com/").unwrap()).is_err());
        assert!(validate_mirror_url(&Url::parse("ftp://mirror.example.com/").unwrap()).is_err());
    }
}
