//! Provider plugin cache directory.
//!
//! Layout, relative to the cache root:
//!
//! ```text
//! <host>/<namespace>/<type>/<version>/<os>_<arch>/...                   unpacked
//! <host>/<namespace>/<type>/terraform-provider-<type>_<version>_<os>_<arch>.zip   packed
//! ```
//!
//! Local mirror directories use the same layout, so [`scan_packages`] serves
//! both. The installer only ever writes the unpacked form.
//!
//! Writes go through a staging directory and a rename, and are serialized per
//! cache root by a lock from [`CacheLocks`]. Reads take no lock: a package
//! directory is either absent or complete.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use lockstep_schema::{PackageHash, Platform, Provider, Version};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hashing::{self, HashError};
use crate::io::extract::{self, ExtractError};
use crate::sources::PackageLocation;

const PACKED_PREFIX: &str = "terraform-provider-";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot write to provider cache at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot extract provider package: {0}")]
    Extract(#[from] ExtractError),

    #[error("cache write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A package present in a cache or mirror directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPackage {
    pub provider: Provider,
    pub version: Version,
    pub platform: Platform,
    /// `LocalDir` or `LocalArchive`.
    pub location: PackageLocation,
}

impl CachedPackage {
    fn path_and_kind(&self) -> (&Path, bool) {
        match &self.location {
            PackageLocation::LocalArchive(p) => (p, true),
            PackageLocation::LocalDir(p) => (p, false),
            PackageLocation::Http(_) => (Path::new(""), false),
        }
    }

    /// `h1` hash of the package contents.
    pub fn hash(&self) -> Result<PackageHash, HashError> {
        match self.path_and_kind() {
            (p, true) => hashing::hash_zip_h1(p),
            (p, false) => hashing::hash_dir_h1(p),
        }
    }

    /// Whether the package matches one of `allowed`.
    pub fn matches_any(&self, allowed: &[PackageHash]) -> Result<bool, HashError> {
        let (path, is_archive) = self.path_and_kind();
        hashing::package_matches_any(path, is_archive, allowed)
    }
}

/// Per-directory write locks shared by every cache opened on the same root.
#[derive(Debug, Clone, Default)]
pub struct CacheLocks {
    inner: Arc<std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CacheLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding writes under `root`.
    pub fn lock_for(&self, root: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = canonical_key(root);
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

fn canonical_key(root: &Path) -> PathBuf {
    if let Ok(canonical) = root.canonicalize() {
        return canonical;
    }
    if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(root))
            .unwrap_or_else(|_| root.to_path_buf())
    }
}

/// A provider plugin cache for one target platform.
#[derive(Debug)]
pub struct ProviderCache {
    root: PathBuf,
    platform: Platform,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ProviderCache {
    pub fn new(root: impl Into<PathBuf>, platform: Platform, locks: &CacheLocks) -> Self {
        let root = root.into();
        let write_lock = locks.lock_for(&root);
        Self {
            root,
            platform,
            write_lock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Directory an unpacked package lives in.
    pub fn package_dir(&self, provider: &Provider, version: &Version) -> PathBuf {
        provider_dir(&self.root, provider)
            .join(version.to_string())
            .join(self.platform.to_string())
    }

    /// Every package for this cache's platform, newest first per provider.
    pub fn all_available_packages(&self) -> BTreeMap<Provider, Vec<CachedPackage>> {
        scan_packages(&self.root, Some(&self.platform))
    }

    /// Packages for one provider, newest first.
    pub fn available_packages_for(&self, provider: &Provider) -> Vec<CachedPackage> {
        let mut packages = scan_provider_dir(
            &provider_dir(&self.root, provider),
            provider,
            Some(&self.platform),
        );
        sort_newest_first(&mut packages);
        packages
    }

    /// Extract a zip into the cache.
    pub async fn install_from_archive(
        &self,
        provider: &Provider,
        version: &Version,
        archive: &Path,
    ) -> Result<CachedPackage, CacheError> {
        let archive = archive.to_path_buf();
        self.install_with(provider, version, move |staging| {
            extract::extract_zip(&archive, staging)?;
            Ok(())
        })
        .await
    }

    /// Copy an unpacked package into the cache.
    pub async fn install_from_dir(
        &self,
        provider: &Provider,
        version: &Version,
        src: &Path,
    ) -> Result<CachedPackage, CacheError> {
        let src = src.to_path_buf();
        self.install_with(provider, version, move |staging| {
            extract::copy_dir(&src, staging).map_err(ExtractError::from)?;
            Ok(())
        })
        .await
    }

    async fn install_with<F>(
        &self,
        provider: &Provider,
        version: &Version,
        fill: F,
    ) -> Result<CachedPackage, CacheError>
    where
        F: FnOnce(&Path) -> Result<(), CacheError> + Send + 'static,
    {
        let target = self.package_dir(provider, version);
        let _guard = self.write_lock.lock().await;

        let dest = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dest, fill)).await??;

        debug!(%provider, %version, dir = %target.display(), "installed package into cache");
        Ok(CachedPackage {
            provider: provider.clone(),
            version: version.clone(),
            platform: self.platform.clone(),
            location: PackageLocation::LocalDir(target),
        })
    }
}

fn write_atomically<F>(target: &Path, fill: F) -> Result<(), CacheError>
where
    F: FnOnce(&Path) -> Result<(), CacheError>,
{
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| CacheError::Io { path, source }
    };

    let parent = target.parent().unwrap_or(target);
    fs::create_dir_all(parent).map_err(io_err(parent))?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(io_err(parent))?;
    fill(staging.path())?;

    if target.exists() {
        fs::remove_dir_all(target).map_err(io_err(target))?;
    }
    fs::rename(staging.path(), target).map_err(io_err(target))?;
    Ok(())
}

fn provider_dir(root: &Path, provider: &Provider) -> PathBuf {
    root.join(&provider.hostname)
        .join(&provider.namespace)
        .join(&provider.type_)
}

fn sort_newest_first(packages: &mut [CachedPackage]) {
    packages.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| a.platform.cmp(&b.platform))
    });
}

/// Scan a directory in cache layout.
///
/// With `platform` set, packages for other platforms are skipped. Entries
/// that don't fit the layout are ignored.
pub fn scan_packages(
    root: &Path,
    platform: Option<&Platform>,
) -> BTreeMap<Provider, Vec<CachedPackage>> {
    let mut found: BTreeMap<Provider, Vec<CachedPackage>> = BTreeMap::new();

    for host in read_dir_names(root) {
        for namespace in read_dir_names(&root.join(&host)) {
            for type_ in read_dir_names(&root.join(&host).join(&namespace)) {
                let Ok(provider) = Provider::parse(&format!("{host}/{namespace}/{type_}")) else {
                    debug!(host, namespace, type_, "ignoring non-provider directory");
                    continue;
                };
                let dir = root.join(&host).join(&namespace).join(&type_);
                let packages = scan_provider_dir(&dir, &provider, platform);
                if !packages.is_empty() {
                    found.entry(provider).or_default().extend(packages);
                }
            }
        }
    }

    for packages in found.values_mut() {
        sort_newest_first(packages);
    }
    found
}

fn scan_provider_dir(
    dir: &Path,
    provider: &Provider,
    platform: Option<&Platform>,
) -> Vec<CachedPackage> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let wanted = |p: &Platform| platform.is_none_or(|want| want == p);
    let mut packages = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            let Ok(version) = Version::parse(&name) else {
                continue;
            };
            for plat_name in read_dir_names(&path) {
                let Ok(plat) = plat_name.parse::<Platform>() else {
                    continue;
                };
                if wanted(&plat) {
                    packages.push(CachedPackage {
                        provider: provider.clone(),
                        version: version.clone(),
                        platform: plat,
                        location: PackageLocation::LocalDir(path.join(&plat_name)),
                    });
                }
            }
        } else if let Some((version, plat)) = parse_packed_name(&name, &provider.type_) {
            if wanted(&plat) {
                packages.push(CachedPackage {
                    provider: provider.clone(),
                    version,
                    platform: plat,
                    location: PackageLocation::LocalArchive(path),
                });
            }
        }
    }
    packages
}

/// `terraform-provider-<type>_<version>_<os>_<arch>.zip`
fn parse_packed_name(name: &str, type_: &str) -> Option<(Version, Platform)> {
    let rest = name
        .strip_prefix(PACKED_PREFIX)?
        .strip_prefix(type_)?
        .strip_prefix('_')?
        .strip_suffix(".zip")?;
    let (version, platform) = rest.split_once('_')?;
    Some((Version::parse(version).ok()?, platform.parse().ok()?))
}

fn read_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Hash every package, logging and tolerating individual failures.
pub fn hashes_for(packages: &[CachedPackage]) -> Vec<Option<PackageHash>> {
    packages
        .iter()
        .map(|pkg| match pkg.hash() {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(provider = %pkg.provider, version = %pkg.version, error = %e, "cannot hash cached package");
                None
            }
        })
        .collect()
}
