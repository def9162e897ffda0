//! Source bundles: a pre-fetched set of configuration packages on local disk.
//!
//! A bundle directory holds one sub-directory per remote package plus a
//! `lockstep-sources.json` manifest that records which remote package lives
//! where, and which registry versions map onto which remote packages:
//!
//! ```json
//! {
//!   "packages": [
//!     { "source": "git::https://example.com/net.git?ref=v1.2.0", "local": "a1b2c3" }
//!   ],
//!   "registry": [
//!     {
//!       "source": "example.com/acme/net/aws",
//!       "versions": { "1.2.0": { "source": "git::https://example.com/net.git?ref=v1.2.0" } }
//!     }
//!   ]
//! }
//! ```
//!
//! Bundles are read-only once opened.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use lockstep_schema::Version;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::sourceaddrs::{
    FinalSource, RegistryPackage, RemotePackage, SourceAddr, SourceAddrError,
};

/// File name of the bundle manifest.
pub const MANIFEST_FILE: &str = "lockstep-sources.json";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("cannot read source bundle at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source bundle manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("invalid source address {addr:?} in bundle manifest: {source}")]
    Address {
        addr: String,
        #[source]
        source: SourceAddrError,
    },

    #[error("bundle manifest entry {0:?} must be an unversioned package without a sub-path")]
    NotAPackage(String),

    #[error("invalid version {version:?} for {package} in bundle manifest")]
    Version { package: String, version: String },

    #[error("bundle package {package} refers to missing directory {local:?}")]
    MissingPackage { package: String, local: String },

    #[error("registry package {package} v{version} refers to {remote}, which is not in the bundle")]
    DanglingRegistryVersion {
        package: String,
        version: String,
        remote: String,
    },

    #[error("the source bundle does not include {0}")]
    NotInBundle(String),

    #[error("cannot find a local path for relative source {0:?} without a base package")]
    RelativeSource(String),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    packages: Vec<ManifestPackage>,
    #[serde(default)]
    registry: Vec<ManifestRegistry>,
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    source: String,
    local: String,
}

#[derive(Debug, Deserialize)]
struct ManifestRegistry {
    source: String,
    #[serde(default)]
    versions: BTreeMap<String, ManifestRegistryVersion>,
}

#[derive(Debug, Deserialize)]
struct ManifestRegistryVersion {
    source: String,
}

/// An opened source bundle.
#[derive(Debug)]
pub struct SourceBundle {
    root: PathBuf,
    remote: HashMap<RemotePackage, String>,
    registry: HashMap<RegistryPackage, BTreeMap<Version, RemotePackage>>,
}

impl SourceBundle {
    /// Open and validate the bundle rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError`] if the manifest is missing or malformed, or if
    /// it refers to package directories that do not exist.
    pub fn open_dir(dir: &Path) -> Result<Self, BundleError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&manifest_path).map_err(|source| BundleError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&raw)?;

        let mut remote = HashMap::new();
        for pkg in manifest.packages {
            let package = parse_remote_package(&pkg.source)?;
            let valid_local = !pkg.local.is_empty()
                && !pkg.local.contains(['/', '\\'])
                && pkg.local != "."
                && pkg.local != "..";
            if !valid_local || !dir.join(&pkg.local).is_dir() {
                return Err(BundleError::MissingPackage {
                    package: pkg.source,
                    local: pkg.local,
                });
            }
            remote.insert(package, pkg.local);
        }

        let mut registry = HashMap::new();
        for entry in manifest.registry {
            let package = match SourceAddr::parse(&entry.source) {
                Ok(SourceAddr::Registry(r)) if r.subdir.is_empty() => r.package,
                Ok(_) => return Err(BundleError::NotAPackage(entry.source)),
                Err(source) => {
                    return Err(BundleError::Address {
                        addr: entry.source,
                        source,
                    });
                }
            };

            let mut versions = BTreeMap::new();
            for (raw_version, meta) in entry.versions {
                let version =
                    Version::parse(&raw_version).map_err(|_| BundleError::Version {
                        package: package.to_string(),
                        version: raw_version.clone(),
                    })?;
                let target = parse_remote_package(&meta.source)?;
                if !remote.contains_key(&target) {
                    return Err(BundleError::DanglingRegistryVersion {
                        package: package.to_string(),
                        version: raw_version,
                        remote: target.to_string(),
                    });
                }
                versions.insert(version, target);
            }
            registry.insert(package, versions);
        }

        debug!(
            root = %dir.display(),
            packages = remote.len(),
            registry_packages = registry.len(),
            "opened source bundle"
        );

        Ok(Self {
            root: dir.to_path_buf(),
            remote,
            registry,
        })
    }

    /// The directory this bundle was opened from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published versions of a registry package, oldest first.
    ///
    /// A package the bundle knows nothing about has no versions.
    pub fn registry_package_versions(&self, package: &RegistryPackage) -> Vec<Version> {
        self.registry
            .get(package)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Local directory holding the artifact a final source refers to.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::RelativeSource`] for local sources and
    /// [`BundleError::NotInBundle`] if the package is not part of this bundle.
    pub fn local_path_for_source(&self, source: &FinalSource) -> Result<PathBuf, BundleError> {
        let (package, subdir) = match source {
            FinalSource::Local(l) => return Err(BundleError::RelativeSource(l.rel_path.clone())),
            FinalSource::Remote(r) => (&r.package, r.subdir.as_str()),
            FinalSource::Registry(r) => {
                let remote = self
                    .registry
                    .get(&r.package)
                    .and_then(|versions| versions.get(&r.version))
                    .ok_or_else(|| BundleError::NotInBundle(source.to_string()))?;
                (remote, r.subdir.as_str())
            }
        };

        let local = self
            .remote
            .get(package)
            .ok_or_else(|| BundleError::NotInBundle(source.to_string()))?;

        let mut path = self.root.join(local);
        if !subdir.is_empty() {
            path.push(subdir);
        }
        Ok(path)
    }
}

fn parse_remote_package(s: &str) -> Result<RemotePackage, BundleError> {
    match SourceAddr::parse(s) {
        Ok(SourceAddr::Remote(r)) if r.subdir.is_empty() => Ok(r.package),
        Ok(_) => Err(BundleError::NotAPackage(s.to_string())),
        Err(source) => Err(BundleError::Address {
            addr: s.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A bundle with one remote package holding `net/main.tf` and a lock file,
    /// published in the registry as three versions.
    pub(crate) fn sample_bundle() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg-net/modules/vpc")).unwrap();
        fs::write(dir.path().join("pkg-net/modules/vpc/main.tf"), "# vpc").unwrap();
        fs::create_dir_all(dir.path().join("pkg-cfg")).unwrap();
        fs::write(dir.path().join("pkg-cfg/deps.lock.toml"), "").unwrap();

        let manifest = serde_json::json!({
            "packages": [
                { "source": "git::https://example.com/net.git?ref=v1", "local": "pkg-net" },
                { "source": "https://example.com/cfg.tar.gz", "local": "pkg-cfg" }
            ],
            "registry": [
                {
                    "source": "example.com/acme/net/aws",
                    "versions": {
                        "1.0.0": { "source": "git::https://example.com/net.git?ref=v1" },
                        "1.2.0": { "source": "git::https://example.com/net.git?ref=v1" },
                        "2.0.0": { "source": "git::https://example.com/net.git?ref=v1" }
                    }
                }
            ]
        });
        fs::write(dir.path().join(MANIFEST_FILE), manifest.to_string()).unwrap();
        dir
    }

    #[test]
    fn opens_and_lists_versions() {
        let dir = sample_bundle();
        let bundle = SourceBundle::open_dir(dir.path()).unwrap();

        let SourceAddr::Registry(r) = SourceAddr::parse("example.com/acme/net/aws").unwrap() else {
            panic!("expected registry address");
        };
        let versions = bundle.registry_package_versions(&r.package);
        assert_eq!(
            versions,
            vec![
                Version::new(1, 0, 0),
                Version::new(1, 2, 0),
                Version::new(2, 0, 0)
            ]
        );

        let SourceAddr::Registry(unknown) = SourceAddr::parse("acme/other/aws").unwrap() else {
            panic!("expected registry address");
        };
        assert!(bundle.registry_package_versions(&unknown.package).is_empty());
    }

    #[test]
    fn local_paths_for_final_sources() {
        let dir = sample_bundle();
        let bundle = SourceBundle::open_dir(dir.path()).unwrap();

        let SourceAddr::RegistryFinal(pinned) =
            SourceAddr::parse("example.com/acme/net/aws@1.2.0//modules/vpc").unwrap()
        else {
            panic!("expected versioned registry address");
        };
        let path = bundle
            .local_path_for_source(&FinalSource::Registry(pinned))
            .unwrap();
        assert_eq!(path, dir.path().join("pkg-net/modules/vpc"));

        let SourceAddr::Remote(remote) = SourceAddr::parse("https://example.com/cfg.tar.gz//deps.lock.toml").unwrap()
        else {
            panic!("expected remote address");
        };
        let path = bundle
            .local_path_for_source(&FinalSource::Remote(remote))
            .unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn missing_manifest_or_package_dir() {
        let empty = TempDir::new().unwrap();
        assert!(matches!(
            SourceBundle::open_dir(empty.path()),
            Err(BundleError::Io { .. })
        ));

        let dir = sample_bundle();
        fs::remove_dir_all(dir.path().join("pkg-cfg")).unwrap();
        assert!(matches!(
            SourceBundle::open_dir(dir.path()),
            Err(BundleError::MissingPackage { .. })
        ));
    }

    #[test]
    fn unknown_versions_are_not_in_bundle() {
        let dir = sample_bundle();
        let bundle = SourceBundle::open_dir(dir.path()).unwrap();
        let SourceAddr::RegistryFinal(pinned) =
            SourceAddr::parse("example.com/acme/net/aws@9.9.9").unwrap()
        else {
            panic!("expected versioned registry address");
        };
        assert!(matches!(
            bundle.local_path_for_source(&FinalSource::Registry(pinned)),
            Err(BundleError::NotInBundle(_))
        ));
    }
}
