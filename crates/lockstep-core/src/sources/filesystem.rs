//! Local filesystem mirror.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lockstep_schema::{Platform, Provider, Version};

use super::{PackageMeta, Source, SourceError, VersionList};
use crate::auth::AuthenticationInput;
use crate::cache::{CachedPackage, scan_packages};

/// A directory laid out like the provider cache.
///
/// The directory is rescanned on every query, so packages dropped in while
/// the service is running are picked up.
#[derive(Debug, Clone)]
pub struct FilesystemMirrorSource {
    root: PathBuf,
}

impl FilesystemMirrorSource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    async fn packages(&self, provider: &Provider) -> Result<Vec<CachedPackage>, SourceError> {
        let root = self.root.clone();
        let provider = provider.clone();
        tokio::task::spawn_blocking(move || {
            scan_packages(&root, None)
                .remove(&provider)
                .unwrap_or_default()
        })
        .await
        .map_err(|e| SourceError::Io {
            path: self.root.clone(),
            source: std::io::Error::other(e),
        })
    }

    fn not_found(&self, provider: &Provider) -> SourceError {
        SourceError::ProviderNotFound {
            provider: provider.to_string(),
            origin: self.describe(),
        }
    }
}

#[async_trait]
impl Source for FilesystemMirrorSource {
    async fn available_versions(&self, provider: &Provider) -> Result<VersionList, SourceError> {
        let packages = self.packages(provider).await?;
        if packages.is_empty() {
            return Err(self.not_found(provider));
        }
        let mut versions: Vec<Version> = packages.into_iter().map(|p| p.version).collect();
        versions.sort();
        versions.dedup();
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
        let packages = self.packages(provider).await?;
        if packages.is_empty() {
            return Err(self.not_found(provider));
        }

        let mut same_version = packages.into_iter().filter(|p| &p.version == version).peekable();
        if same_version.peek().is_none() {
            return Err(SourceError::VersionNotFound {
                provider: provider.to_string(),
                version: version.to_string(),
                origin: self.describe(),
            });
        }
        let pkg = same_version
            .find(|p| &p.platform == platform)
            .ok_or_else(|| SourceError::PlatformNotSupported {
                provider: provider.to_string(),
                version: version.to_string(),
                platform: platform.to_string(),
            })?;

        Ok(PackageMeta {
            provider: pkg.provider,
            version: pkg.version,
            platform: pkg.platform,
            location: pkg.location,
            authentication: AuthenticationInput::None,
        })
    }

    fn describe(&self) -> String {
        format!("filesystem mirror {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::PackageLocation;
    use std::fs;
    use tempfile::TempDir;

    fn mirror() -> TempDir {
        let dir = TempDir::new().unwrap();
        for rel in [
            "registry.terraform.io/hashicorp/null/3.2.1/linux_amd64",
            "registry.terraform.io/hashicorp/null/3.1.0/darwin_arm64",
        ] {
            let d = dir.path().join(rel);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("terraform-provider-null"), "bin").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_lists_all_platform_versions() {
        let dir = mirror();
        let source = FilesystemMirrorSource::new(dir.path());
        let null = Provider::parse("hashicorp/null").unwrap();

        let list = source.available_versions(&null).await.unwrap();
        assert_eq!(list.versions, vec![Version::new(3, 1, 0), Version::new(3, 2, 1)]);

        let err = source
            .available_versions(&Provider::parse("hashicorp/random").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_package_meta_by_platform() {
        let dir = mirror();
        let source = FilesystemMirrorSource::new(dir.path());
        let null = Provider::parse("hashicorp/null").unwrap();
        let linux = Platform::new("linux", "amd64");

        let meta = source
            .package_meta(&null, &Version::new(3, 2, 1), &linux)
            .await
            .unwrap();
        assert_eq!(
            meta.location,
            PackageLocation::LocalDir(
                dir.path()
                    .join("registry.terraform.io/hashicorp/null/3.2.1/linux_amd64")
            )
        );

        let err = source
            .package_meta(&null, &Version::new(3, 1, 0), &linux)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::PlatformNotSupported { .. }));

        let err = source
            .package_meta(&null, &Version::new(9, 9, 9), &linux)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::VersionNotFound { .. }));
    }
}
