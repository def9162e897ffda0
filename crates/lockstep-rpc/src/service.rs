//! The dependencies service.
//!
//! Every remotely visible resource lives in one [`HandleTable`]; callers only
//! ever see `i64` handles. Operations validate their input and handles up
//! front and fail synchronously with a [`ServiceError`]. The one streaming
//! operation, [`DependenciesService::build_provider_plugin_cache`], reports
//! everything after validation as events.

use std::path::Path;
use std::sync::Arc;

use lockstep_core::auth::{SignatureVerifier, UncheckedSignatures};
use lockstep_core::bundle::SourceBundle;
use lockstep_core::handles::HandleKind;
use lockstep_core::resolver::resolve_final_source;
use lockstep_core::sources::http_mirror::validate_mirror_url;
use lockstep_core::sources::{InstallMethod as CoreInstallMethod, build_source};
use lockstep_core::{
    CacheLocks, Config, Handle, HandleTable, Installer, InvalidHandle, LockSet, ProviderCache,
    ProviderLock, cache, discovery::ServiceDiscovery, events, load_locks_from_file,
};
use lockstep_schema::{PackageHash, Platform, Provider, Version, VersionConstraints};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::translate::{EventSink, EventTranslator};
use crate::wire::{
    BuildProviderPluginCacheRequest, InstallMethodSource, OpenDependencyLockFileResponse,
    ProviderPackage, SourceAddress,
};

/// Shared state behind every dependencies operation.
#[derive(Debug)]
pub struct DependenciesService {
    handles: HandleTable,
    cache_locks: CacheLocks,
    client: Client,
    discovery: Arc<ServiceDiscovery>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl DependenciesService {
    pub fn new(client: Client, discovery: ServiceDiscovery) -> Self {
        Self {
            handles: HandleTable::new(),
            cache_locks: CacheLocks::new(),
            client,
            discovery: Arc::new(discovery),
            verifier: Arc::new(UncheckedSignatures),
        }
    }

    /// Replace the signature verifier used for registry packages.
    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Build a service from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(lockstep_core::USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Internal(format!("cannot build HTTP client: {e}")))?;
        let discovery = config.discovery(client.clone());
        Ok(Self::new(client, discovery))
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    fn lookup<T: HandleKind>(&self, raw: i64) -> Result<Arc<T>, ServiceError> {
        self.handles
            .get(Handle::<T>::from_wire(raw))
            .ok_or(ServiceError::InvalidHandle(InvalidHandle { kind: T::NAME }))
    }

    pub fn open_source_bundle(&self, local_path: &Path) -> Result<i64, ServiceError> {
        let bundle = SourceBundle::open_dir(local_path)
            .map_err(|e| ServiceError::Unknown(e.to_string()))?;
        let handle = self.handles.new_source_bundle(bundle);
        debug!(path = %local_path.display(), handle = handle.to_wire(), "opened source bundle");
        Ok(handle.to_wire())
    }

    pub fn close_source_bundle(&self, handle: i64) -> Result<(), ServiceError> {
        Ok(self.handles.close_source_bundle(Handle::from_wire(handle))?)
    }

    /// Resolve `address` against the bundle, returning the final address.
    pub fn resolve_source_address(
        &self,
        bundle_handle: i64,
        address: &SourceAddress,
    ) -> Result<String, ServiceError> {
        let bundle: Arc<SourceBundle> = self.lookup(bundle_handle)?;
        let resolved = resolve_final_source(&address.source, &address.versions, &bundle)?;
        Ok(resolved.to_string())
    }

    pub fn open_dependency_lock_file(
        &self,
        bundle_handle: i64,
        address: &SourceAddress,
    ) -> Result<OpenDependencyLockFileResponse, ServiceError> {
        let bundle: Arc<SourceBundle> = self.lookup(bundle_handle)?;
        let source = resolve_final_source(&address.source, &address.versions, &bundle)
            .map_err(|e| ServiceError::invalid_argument(format!("invalid source address: {e}")))?;
        let path = bundle.local_path_for_source(&source).map_err(|e| {
            ServiceError::invalid_argument(format!("specified lock file is not available: {e}"))
        })?;

        let (locks, diagnostics) = load_locks_from_file(&path);
        let dependency_locks_handle = locks.map(|locks| self.handles.new_dependency_locks(locks).to_wire());
        Ok(OpenDependencyLockFileResponse {
            dependency_locks_handle,
            diagnostics: diagnostics.into_vec(),
        })
    }

    /// Build a lock set from explicit selections.
    pub fn create_dependency_locks(&self, providers: &[ProviderPackage]) -> Result<i64, ServiceError> {
        let mut locks = LockSet::new();
        for pkg in providers {
            let provider = Provider::parse(&pkg.source_addr).map_err(|e| {
                ServiceError::invalid_argument(format!(
                    "invalid provider source address {:?}: {e}",
                    pkg.source_addr
                ))
            })?;
            let version = Version::parse(&pkg.version).map_err(|e| {
                ServiceError::invalid_argument(format!(
                    "invalid version {:?} for {}: {e}",
                    pkg.version,
                    provider.for_display()
                ))
            })?;
            let hashes = pkg
                .hashes
                .iter()
                .map(|raw| {
                    PackageHash::parse(raw)
                        .map(|(hash, _)| hash)
                        .map_err(|e| ServiceError::invalid_argument(format!("invalid hash {raw:?}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if locks.provider(&provider).is_some() {
                return Err(ServiceError::invalid_argument(format!(
                    "duplicate selection for provider {}",
                    provider.for_display()
                )));
            }
            locks.set_provider(ProviderLock::new(
                provider,
                version,
                VersionConstraints::any(),
                hashes,
            ));
        }
        Ok(self.handles.new_dependency_locks(locks).to_wire())
    }

    pub fn close_dependency_locks(&self, handle: i64) -> Result<(), ServiceError> {
        Ok(self.handles.close_dependency_locks(Handle::from_wire(handle))?)
    }

    /// Locked providers sorted by address, for stable output.
    pub fn get_locked_provider_dependencies(
        &self,
        handle: i64,
    ) -> Result<Vec<ProviderPackage>, ServiceError> {
        let locks: Arc<LockSet> = self.lookup(handle)?;
        let mut out: Vec<ProviderPackage> = locks
            .all_providers()
            .values()
            .map(|lock| ProviderPackage {
                source_addr: lock.provider().to_string(),
                version: lock.version().to_string(),
                hashes: lock
                    .preferred_hashes()
                    .iter()
                    .map(|h| h.as_str().to_string())
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| a.source_addr.cmp(&b.source_addr));
        Ok(out)
    }

    /// Install every locked provider into `request.cache_dir`, streaming
    /// progress to `sink`.
    ///
    /// Errors are only returned for requests rejected before the first event.
    /// After that the call always succeeds; installation problems are
    /// diagnostics in the stream.
    pub async fn build_provider_plugin_cache(
        &self,
        request: BuildProviderPluginCacheRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<(), ServiceError> {
        let locks: Arc<LockSet> = self.lookup(request.dependency_locks_handle)?;

        let mut methods = Vec::with_capacity(request.installation_methods.len());
        for method in &request.installation_methods {
            let core_method = match &method.source {
                InstallMethodSource::Direct => CoreInstallMethod::Direct,
                InstallMethodSource::LocalMirrorDir { dir } => CoreInstallMethod::LocalMirror(dir.clone()),
                InstallMethodSource::NetworkMirrorUrl { url } => {
                    let parsed = Url::parse(url).map_err(|_| {
                        ServiceError::invalid_argument(format!("invalid network mirror URL {url:?}"))
                    })?;
                    validate_mirror_url(&parsed).map_err(ServiceError::InvalidArgument)?;
                    CoreInstallMethod::NetworkMirror(parsed)
                }
                InstallMethodSource::Unrecognized => {
                    return Err(ServiceError::Internal(
                        "unsupported installation method source type".to_string(),
                    ));
                }
            };
            if !method.include.is_empty() || !method.exclude.is_empty() {
                return Err(ServiceError::invalid_argument(
                    "include/exclude for installation methods is not yet implemented",
                ));
            }
            methods.push(core_method);
        }

        let platform = parse_platform(&request.override_platform)?;
        let cache = Arc::new(ProviderCache::new(
            &request.cache_dir,
            platform,
            &self.cache_locks,
        ));
        let source = build_source(&methods, &self.discovery, &self.client);
        let installer = Installer::new(
            source,
            cache,
            self.client.clone(),
            self.discovery.credentials().clone(),
        )
        .with_verifier(self.verifier.clone());
        info!(
            cache = %request.cache_dir.display(),
            providers = locks.len(),
            methods = methods.len(),
            "building provider plugin cache"
        );

        let (tx, rx) = events::channel();
        let mut translator = EventTranslator::new(sink);
        let (result, ()) = tokio::join!(
            installer.ensure_provider_versions(&locks, tx, cancel.clone()),
            translator.run(rx, &cancel),
        );

        if let Err(err) = result {
            if cancel.is_cancelled() {
                debug!("plugin cache build cancelled");
            } else {
                translator.summarize_failure(&err).await;
            }
        }
        Ok(())
    }

    pub fn open_provider_plugin_cache(
        &self,
        cache_dir: &Path,
        override_platform: &str,
    ) -> Result<i64, ServiceError> {
        let platform = parse_platform(override_platform)?;
        let cache = ProviderCache::new(cache_dir, platform, &self.cache_locks);
        Ok(self.handles.new_provider_plugin_cache(cache).to_wire())
    }

    pub fn close_provider_plugin_cache(&self, handle: i64) -> Result<(), ServiceError> {
        Ok(self.handles.close_provider_plugin_cache(Handle::from_wire(handle))?)
    }

    /// Every package in the cache for its platform.
    ///
    /// A package whose hash can't be computed is still listed, with no hashes.
    pub async fn get_cached_providers(&self, handle: i64) -> Result<Vec<ProviderPackage>, ServiceError> {
        let cache: Arc<ProviderCache> = self.lookup(handle)?;
        let listed = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for (provider, packages) in cache.all_available_packages() {
                let hashes = cache::hashes_for(&packages);
                for (pkg, hash) in packages.iter().zip(hashes) {
                    out.push(ProviderPackage {
                        source_addr: provider.to_string(),
                        version: pkg.version.to_string(),
                        hashes: hash.map(|h| vec![h.as_str().to_string()]).unwrap_or_default(),
                    });
                }
            }
            out
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("cache scan failed: {e}")))?;
        Ok(listed)
    }
}

fn parse_platform(raw: &str) -> Result<Platform, ServiceError> {
    if raw.is_empty() {
        return Ok(Platform::current());
    }
    raw.parse().map_err(|e| {
        ServiceError::invalid_argument(format!("invalid overridden platform name {raw:?}: {e}"))
    })
}
