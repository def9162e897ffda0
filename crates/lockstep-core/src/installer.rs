//! Multi-source provider installer.
//!
//! [`Installer::ensure_provider_versions`] brings a provider cache up to date
//! with a lock set. Each locked provider is handled by its own task:
//!
//! 1. built-in providers need no package
//! 2. a cached package at the locked version with an acceptable hash is reused
//! 3. otherwise the sources are queried for the locked version, the package
//!    is fetched, authenticated, checked against the lock, and installed
//!
//! Progress goes out as [`InstallEvent`]s on a channel. One provider's
//! failure never stops another; the overall result only summarizes them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lockstep_schema::{Provider, VersionConstraints};
use reqwest::Client;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{
    self, AuthError, AuthenticationInput, PackageAuthentication, SignatureVerifier,
    UncheckedSignatures,
};
use crate::cache::{CacheError, ProviderCache};
use crate::discovery::Credentials;
use crate::events::{EventSender, InstallEvent};
use crate::hashing::{self, HashError};
use crate::io::download::{DownloadError, DownloadRequest};
use crate::lockfile::{LockSet, ProviderLock};
use crate::sources::{MultiSource, PackageLocation, PackageMeta};

/// Built-in provider types this build supports.
pub const BUILTIN_PROVIDER_TYPES: &[&str] = &["terraform"];

/// One provider that could not be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: Provider,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("failed to install {} provider(s): {}", .0.len(), describe_failures(.0))]
    Providers(Vec<ProviderFailure>),

    #[error("cannot create provider cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("installation was cancelled")]
    Cancelled,

    #[error("installer task failed: {0}")]
    Task(#[from] JoinError),
}

fn describe_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider.for_display(), f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
enum FetchError {
    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("cannot hash package: {0}")]
    Hash(#[from] HashError),

    #[error("cannot create download directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("the package doesn't match any of the checksums previously recorded in the dependency lock file")]
    LockMismatch,

    #[error("package verification task failed: {0}")]
    Task(#[from] JoinError),
}

/// Installs locked providers into a cache.
#[derive(Clone)]
pub struct Installer {
    source: MultiSource,
    cache: Arc<ProviderCache>,
    client: Client,
    credentials: Credentials,
    verifier: Arc<dyn SignatureVerifier>,
    builtin_types: Arc<HashSet<String>>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("source", &self.source)
            .field("cache", &self.cache.root())
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(
        source: MultiSource,
        cache: Arc<ProviderCache>,
        client: Client,
        credentials: Credentials,
    ) -> Self {
        Self {
            source,
            cache,
            client,
            credentials,
            verifier: Arc::new(UncheckedSignatures),
            builtin_types: Arc::new(BUILTIN_PROVIDER_TYPES.iter().map(|s| (*s).to_string()).collect()),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Install every provider in `locks` that the cache doesn't already have.
    ///
    /// `PendingProviders` is sent before anything else. When `cancel` fires
    /// or the receiver goes away, unfinished providers stop without sending
    /// further events.
    ///
    /// # Errors
    ///
    /// [`InstallerError::Providers`] lists every provider that failed; each of
    /// them has already had a failure event. Other variants are call-wide.
    pub async fn ensure_provider_versions(
        &self,
        locks: &LockSet,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), InstallerError> {
        let mut requirements: Vec<ProviderLock> = locks.all_providers().values().cloned().collect();
        requirements.sort_by(|a, b| a.provider().cmp(b.provider()));

        let pending = requirements
            .iter()
            .map(|lock| (lock.provider().clone(), VersionConstraints::any()))
            .collect();
        if events.send(InstallEvent::PendingProviders(pending)).await.is_err() {
            return Err(InstallerError::Cancelled);
        }

        let root = self.cache.root().to_path_buf();
        if let Err(source) = tokio::fs::create_dir_all(&root).await {
            return Err(InstallerError::CacheDir { path: root, source });
        }
        info!(providers = requirements.len(), cache = %root.display(), "installing providers");

        let mut set: JoinSet<Option<Result<(), ProviderFailure>>> = JoinSet::new();
        for lock in requirements {
            let installer = self.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    () = events.closed() => None,
                    res = installer.install_one(&lock, &events) => Some(res),
                }
            });
        }
        drop(events);

        let mut failures = Vec::new();
        let mut task_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(Ok(()))) | Ok(None) => {}
                Ok(Some(Err(failure))) => failures.push(failure),
                Err(e) => {
                    warn!(error = %e, "provider installer task failed");
                    task_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = task_error {
            return Err(InstallerError::Task(e));
        }
        if cancel.is_cancelled() {
            return Err(InstallerError::Cancelled);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by(|a, b| a.provider.cmp(&b.provider));
            Err(InstallerError::Providers(failures))
        }
    }

    async fn install_one(
        &self,
        lock: &ProviderLock,
        events: &EventSender,
    ) -> Result<(), ProviderFailure> {
        let provider = lock.provider();
        let version = lock.version();
        let fail = |message: String| ProviderFailure {
            provider: provider.clone(),
            message,
        };

        if provider.is_builtin() {
            if self.builtin_types.contains(&provider.type_) {
                emit(events, InstallEvent::BuiltInProviderAvailable {
                    provider: provider.clone(),
                })
                .await;
                return Ok(());
            }
            let error = format!(
                "this build has no built-in provider named {:?}",
                provider.type_
            );
            emit(events, InstallEvent::BuiltInProviderFailure {
                provider: provider.clone(),
                error: error.clone(),
            })
            .await;
            return Err(fail(error));
        }

        if self.already_installed(lock).await {
            debug!(%provider, %version, "already in cache");
            emit(events, InstallEvent::ProviderAlreadyInstalled {
                provider: provider.clone(),
                version: version.clone(),
            })
            .await;
            return Ok(());
        }

        emit(events, InstallEvent::QueryPackagesBegin {
            provider: provider.clone(),
            constraints: VersionConstraints::any(),
            locked: true,
        })
        .await;
        let found = match self
            .source
            .find_package(provider, version, self.cache.platform())
            .await
        {
            Ok(found) => found,
            Err(e) => {
                let error = e.to_string();
                emit(events, InstallEvent::QueryPackagesFailure {
                    provider: provider.clone(),
                    error: error.clone(),
                })
                .await;
                return Err(fail(error));
            }
        };
        if !found.warnings.is_empty() {
            emit(events, InstallEvent::QueryPackagesWarning {
                provider: provider.clone(),
                warnings: found.warnings,
            })
            .await;
        }
        emit(events, InstallEvent::QueryPackagesSuccess {
            provider: provider.clone(),
            version: version.clone(),
        })
        .await;

        let meta = found.meta;
        emit(events, InstallEvent::FetchPackageBegin {
            provider: provider.clone(),
            version: version.clone(),
            location: meta.location.clone(),
        })
        .await;
        match self.fetch(lock, &meta).await {
            Ok(authentication) => {
                debug!(%provider, %version, %authentication, "installed");
                emit(events, InstallEvent::FetchPackageSuccess {
                    provider: provider.clone(),
                    version: version.clone(),
                    location: meta.location,
                    authentication,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                emit(events, InstallEvent::FetchPackageFailure {
                    provider: provider.clone(),
                    version: version.clone(),
                    error: error.clone(),
                })
                .await;
                Err(fail(error))
            }
        }
    }

    /// A cached package at the locked version matching one of the lock's
    /// hashes, or any such package if the lock records none.
    async fn already_installed(&self, lock: &ProviderLock) -> bool {
        let cache = Arc::clone(&self.cache);
        let provider = lock.provider().clone();
        let lock = lock.clone();
        let check = tokio::task::spawn_blocking(move || {
            cache
                .available_packages_for(lock.provider())
                .into_iter()
                .filter(|pkg| &pkg.version == lock.version())
                .any(|pkg| {
                    if lock.all_hashes().is_empty() {
                        return true;
                    }
                    pkg.matches_any(lock.all_hashes()).unwrap_or_else(|e| {
                        warn!(provider = %pkg.provider, error = %e, "cannot hash cached package");
                        false
                    })
                })
        });
        check.await.unwrap_or_else(|e| {
            warn!(%provider, error = %e, "cache check task failed");
            false
        })
    }

    async fn fetch(
        &self,
        lock: &ProviderLock,
        meta: &PackageMeta,
    ) -> Result<PackageAuthentication, FetchError> {
        match &meta.location {
            PackageLocation::Http(url) => {
                let tmp = tempfile::Builder::new()
                    .prefix("lockstep-download-")
                    .tempdir()?;
                let archive = tmp.path().join("package.zip");
                let mut request = DownloadRequest::new(&self.client, url, &archive)
                    .with_bearer_token(self.credentials.token_for_url(url));
                if let AuthenticationInput::Signed(signed) = &meta.authentication {
                    request = request.with_expected_sha256(&signed.shasum);
                }
                let sha256 = request.execute().await?;
                self.verify_and_install(lock, meta, &archive, true, Some(sha256))
                    .await
            }
            PackageLocation::LocalArchive(path) => {
                self.verify_and_install(lock, meta, path, true, None).await
            }
            PackageLocation::LocalDir(path) => {
                self.verify_and_install(lock, meta, path, false, None).await
            }
        }
    }

    async fn verify_and_install(
        &self,
        lock: &ProviderLock,
        meta: &PackageMeta,
        path: &Path,
        is_archive: bool,
        sha256: Option<String>,
    ) -> Result<PackageAuthentication, FetchError> {
        let input = meta.authentication.clone();
        let verifier = Arc::clone(&self.verifier);
        let allowed = lock.all_hashes().to_vec();
        let pkg_path = path.to_path_buf();

        let authentication = tokio::task::spawn_blocking(move || {
            let authentication = auth::authenticate(
                &input,
                &pkg_path,
                is_archive,
                sha256.as_deref(),
                verifier.as_ref(),
            )?;
            if !allowed.is_empty() && !hashing::package_matches_any(&pkg_path, is_archive, &allowed)? {
                return Err(FetchError::LockMismatch);
            }
            Ok(authentication)
        })
        .await??;

        if is_archive {
            self.cache
                .install_from_archive(&meta.provider, &meta.version, path)
                .await?;
        } else {
            self.cache
                .install_from_dir(&meta.provider, &meta.version, path)
                .await?;
        }
        Ok(authentication)
    }
}

async fn emit(events: &EventSender, event: InstallEvent) {
    // A closed channel is noticed by the task's select.
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLocks;
    use crate::discovery::ServiceDiscovery;
    use crate::events;
    use crate::sources::{InstallMethod, build_source};
    use lockstep_schema::{PackageHash, Platform, Version};
    use std::fs;
    use tempfile::TempDir;

    fn linux() -> Platform {
        Platform::new("linux", "amd64")
    }

    fn lock(provider: &str, version: &str, hashes: Vec<PackageHash>) -> ProviderLock {
        ProviderLock::new(
            Provider::parse(provider).unwrap(),
            Version::parse(version).unwrap(),
            VersionConstraints::any(),
            hashes,
        )
    }

    fn lock_set(locks: Vec<ProviderLock>) -> LockSet {
        let mut set = LockSet::new();
        for l in locks {
            set.set_provider(l);
        }
        set
    }

    /// Mirror holding hashicorp/null 3.2.1 for linux_amd64, unpacked.
    fn mirror() -> TempDir {
        let dir = TempDir::new().unwrap();
        let pkg = dir
            .path()
            .join("registry.terraform.io/hashicorp/null/3.2.1/linux_amd64");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("terraform-provider-null_v3.2.1"), "null binary").unwrap();
        dir
    }

    fn installer(methods: &[InstallMethod], cache_root: &Path) -> Installer {
        let client = Client::new();
        let discovery = Arc::new(ServiceDiscovery::new(client.clone(), Credentials::new()));
        let source = build_source(methods, &discovery, &client);
        let cache = Arc::new(ProviderCache::new(cache_root, linux(), &CacheLocks::new()));
        Installer::new(source, cache, client, Credentials::new())
    }

    async fn run(installer: &Installer, locks: &LockSet) -> (Result<(), InstallerError>, Vec<InstallEvent>) {
        let (tx, mut rx) = events::channel();
        let result = installer
            .ensure_provider_versions(locks, tx, CancellationToken::new())
            .await;
        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            seen.push(ev);
        }
        (result, seen)
    }

    fn for_provider<'a>(events: &'a [InstallEvent], provider: &str) -> Vec<&'a InstallEvent> {
        let provider = Provider::parse(provider).unwrap();
        events
            .iter()
            .filter(|e| e.provider() == Some(&provider))
            .collect()
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let mirror = mirror();
        let cache = TempDir::new().unwrap();
        let unreachable = reqwest::Url::parse("http://127.0.0.1:1/").unwrap();
        let installer = installer(
            &[
                InstallMethod::LocalMirror(mirror.path().to_path_buf()),
                InstallMethod::NetworkMirror(unreachable),
            ],
            cache.path(),
        );
        let locks = lock_set(vec![
            lock("hashicorp/null", "3.2.1", vec![]),
            lock("hashicorp/random", "3.6.0", vec![]),
            lock("terraform.io/builtin/terraform", "1.0.0", vec![]),
        ]);

        let (result, events) = run(&installer, &locks).await;

        assert!(matches!(events[0], InstallEvent::PendingProviders(ref p) if p.len() == 3));

        let null = for_provider(&events, "hashicorp/null");
        assert!(matches!(null[0], InstallEvent::QueryPackagesBegin { .. }));
        assert!(matches!(null[1], InstallEvent::QueryPackagesSuccess { .. }));
        assert!(matches!(null[2], InstallEvent::FetchPackageBegin { .. }));
        assert!(matches!(
            null[3],
            InstallEvent::FetchPackageSuccess {
                authentication: PackageAuthentication::Unauthenticated,
                ..
            }
        ));

        let random = for_provider(&events, "hashicorp/random");
        assert_eq!(random.len(), 2);
        assert!(matches!(random[0], InstallEvent::QueryPackagesBegin { .. }));
        assert!(matches!(random[1], InstallEvent::QueryPackagesFailure { .. }));
        assert_eq!(events.iter().filter(|e| e.is_failure()).count(), 1);

        let builtin = for_provider(&events, "terraform.io/builtin/terraform");
        assert!(matches!(builtin[..], [InstallEvent::BuiltInProviderAvailable { .. }]));

        let Err(InstallerError::Providers(failures)) = result else {
            panic!("expected provider failures");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, Provider::parse("hashicorp/random").unwrap());

        let cached = ProviderCache::new(cache.path(), linux(), &CacheLocks::new());
        assert_eq!(
            cached
                .available_packages_for(&Provider::parse("hashicorp/null").unwrap())
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_already_installed_skips_query() {
        let mirror = mirror();
        let h1 = hashing::hash_dir_h1(
            &mirror
                .path()
                .join("registry.terraform.io/hashicorp/null/3.2.1/linux_amd64"),
        )
        .unwrap();

        // The mirror itself doubles as a populated cache.
        let installer = installer(&[], mirror.path());
        let locks = lock_set(vec![lock("hashicorp/null", "3.2.1", vec![h1])]);

        let (result, events) = run(&installer, &locks).await;
        result.unwrap();
        assert!(matches!(
            events[..],
            [
                InstallEvent::PendingProviders(_),
                InstallEvent::ProviderAlreadyInstalled { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn test_lock_hash_mismatch_fails_fetch() {
        let mirror = mirror();
        let cache = TempDir::new().unwrap();
        let installer = installer(
            &[InstallMethod::LocalMirror(mirror.path().to_path_buf())],
            cache.path(),
        );
        let locks = lock_set(vec![lock(
            "hashicorp/null",
            "3.2.1",
            vec![PackageHash::h1("bm90IHRoZSByaWdodCBoYXNo")],
        )]);

        let (result, events) = run(&installer, &locks).await;
        assert!(matches!(result, Err(InstallerError::Providers(_))));
        let InstallEvent::FetchPackageFailure { error, .. } = events.last().unwrap() else {
            panic!("expected fetch failure, got {events:?}");
        };
        assert!(error.contains("dependency lock file"));
        assert!(
            ProviderCache::new(cache.path(), linux(), &CacheLocks::new())
                .all_available_packages()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_unknown_builtin() {
        let cache = TempDir::new().unwrap();
        let installer = installer(&[], cache.path());
        let locks = lock_set(vec![lock("terraform.io/builtin/nope", "1.0.0", vec![])]);

        let (result, events) = run(&installer, &locks).await;
        assert!(matches!(events[1], InstallEvent::BuiltInProviderFailure { .. }));
        assert!(matches!(result, Err(InstallerError::Providers(ref f)) if f.len() == 1));
    }

    #[tokio::test]
    async fn test_missing_version_is_query_failure() {
        let mirror = mirror();
        let cache = TempDir::new().unwrap();
        let installer = installer(
            &[InstallMethod::LocalMirror(mirror.path().to_path_buf())],
            cache.path(),
        );
        let locks = lock_set(vec![lock("hashicorp/null", "9.9.9", vec![])]);

        let (_, events) = run(&installer, &locks).await;
        let InstallEvent::QueryPackagesFailure { error, .. } = &events[2] else {
            panic!("expected query failure, got {events:?}");
        };
        assert!(error.contains("9.9.9"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mirror = mirror();
        let cache = TempDir::new().unwrap();
        let installer = installer(
            &[InstallMethod::LocalMirror(mirror.path().to_path_buf())],
            cache.path(),
        );
        let locks = lock_set(vec![lock("hashicorp/null", "3.2.1", vec![])]);

        let token = CancellationToken::new();
        token.cancel();
        let (tx, mut rx) = events::channel();
        let result = installer.ensure_provider_versions(&locks, tx, token).await;
        assert!(matches!(result, Err(InstallerError::Cancelled)));

        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            seen.push(ev);
        }
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], InstallEvent::PendingProviders(_)));
    }

    #[tokio::test]
    async fn test_pending_precedes_cache_dir_failure() {
        let mirror = mirror();
        let scratch = TempDir::new().unwrap();
        let blocked = scratch.path().join("cache");
        fs::write(&blocked, "not a directory").unwrap();
        let installer = installer(
            &[InstallMethod::LocalMirror(mirror.path().to_path_buf())],
            &blocked,
        );
        let locks = lock_set(vec![lock("hashicorp/null", "3.2.1", vec![])]);

        let (result, events) = run(&installer, &locks).await;
        assert!(matches!(result, Err(InstallerError::CacheDir { .. })));
        assert!(matches!(events[..], [InstallEvent::PendingProviders(_)]));
    }

    #[tokio::test]
    async fn test_installs_from_zip_with_matching_lock_hash() {
        let mirror = TempDir::new().unwrap();
        let type_dir = mirror.path().join("registry.terraform.io/hashicorp/null");
        fs::create_dir_all(&type_dir).unwrap();
        let archive = type_dir.join("terraform-provider-null_3.2.1_linux_amd64.zip");
        crate::io::extract::tests::write_zip(&archive, &[("terraform-provider-null", b"bin")]);
        let zh = hashing::hash_zip_zh(&archive).unwrap();

        let cache = TempDir::new().unwrap();
        let installer = installer(
            &[InstallMethod::LocalMirror(mirror.path().to_path_buf())],
            cache.path(),
        );
        let locks = lock_set(vec![lock("hashicorp/null", "3.2.1", vec![zh])]);

        let (result, _) = run(&installer, &locks).await;
        result.unwrap();
        let cached = ProviderCache::new(cache.path(), linux(), &CacheLocks::new());
        let pkgs = cached.available_packages_for(&Provider::parse("hashicorp/null").unwrap());
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].hash().unwrap(), hashing::hash_zip_h1(&archive).unwrap());
    }
}
