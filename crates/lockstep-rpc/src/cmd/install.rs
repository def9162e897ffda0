//! Install command

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{print_json, report_diagnostics};
use crate::DependenciesService;
use crate::wire::{
    BuildProviderPluginCacheEvent, BuildProviderPluginCacheRequest, InstallMethod,
    InstallMethodSource, SourceAddress,
};

#[derive(Debug)]
pub struct InstallOptions {
    pub bundle: PathBuf,
    pub lock_file: String,
    pub cache_dir: PathBuf,
    pub local_mirrors: Vec<PathBuf>,
    pub network_mirrors: Vec<String>,
    pub direct: bool,
    pub platform: String,
}

impl InstallOptions {
    /// Local mirrors, then network mirrors, then the origin registry.
    /// With nothing requested, only the origin registry.
    fn methods(&self) -> Vec<InstallMethod> {
        let mut methods: Vec<InstallMethod> = self
            .local_mirrors
            .iter()
            .map(|dir| InstallMethod::new(InstallMethodSource::LocalMirrorDir { dir: dir.clone() }))
            .chain(self.network_mirrors.iter().map(|url| {
                InstallMethod::new(InstallMethodSource::NetworkMirrorUrl { url: url.clone() })
            }))
            .collect();
        if self.direct || methods.is_empty() {
            methods.push(InstallMethod::new(InstallMethodSource::Direct));
        }
        methods
    }
}

/// Install the providers a lock file selects, printing each event as JSON.
///
/// Exits with an error if any error diagnostic was reported.
pub async fn install(service: &DependenciesService, opts: InstallOptions) -> Result<()> {
    let bundle_handle = service
        .open_source_bundle(&opts.bundle)
        .with_context(|| format!("Failed to open source bundle {}", opts.bundle.display()))?;
    let opened = service.open_dependency_lock_file(
        bundle_handle,
        &SourceAddress {
            source: opts.lock_file.clone(),
            versions: String::new(),
        },
    )?;
    report_diagnostics(&opened.diagnostics);
    let Some(locks_handle) = opened.dependency_locks_handle else {
        bail!("Dependency lock file {} is not usable", opts.lock_file);
    };

    let request = BuildProviderPluginCacheRequest {
        cache_dir: opts.cache_dir.clone(),
        dependency_locks_handle: locks_handle,
        installation_methods: opts.methods(),
        override_platform: opts.platform.clone(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (sink, mut events) = mpsc::channel::<BuildProviderPluginCacheEvent>(64);
    let printer = tokio::spawn(async move {
        let mut failed = false;
        while let Some(event) = events.recv().await {
            if let Some(diag) = event.diagnostic() {
                failed |= report_diagnostics(std::slice::from_ref(diag));
            }
            print_json(&event)?;
        }
        anyhow::Ok(failed)
    });

    service
        .build_provider_plugin_cache(request, sink, cancel.clone())
        .await?;
    let failed = printer.await.context("Event printer panicked")??;

    service.close_dependency_locks(locks_handle)?;
    service.close_source_bundle(bundle_handle)?;

    if cancel.is_cancelled() {
        bail!("Installation cancelled");
    }
    if failed {
        bail!("Some providers could not be installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> InstallOptions {
        InstallOptions {
            bundle: PathBuf::from("bundle"),
            lock_file: "./deps.lock.toml".into(),
            cache_dir: PathBuf::from("cache"),
            local_mirrors: Vec::new(),
            network_mirrors: Vec::new(),
            direct: false,
            platform: String::new(),
        }
    }

    #[test]
    fn test_defaults_to_direct() {
        let methods = opts().methods();
        assert_eq!(methods, vec![InstallMethod::new(InstallMethodSource::Direct)]);
    }

    #[test]
    fn test_mirror_order() {
        let mut o = opts();
        o.local_mirrors = vec![PathBuf::from("/m")];
        o.network_mirrors = vec!["https://mirror.example.com/".into()];
        let methods = o.methods();
        assert_eq!(methods.len(), 2);
        assert!(matches!(methods[0].source, InstallMethodSource::LocalMirrorDir { .. }));
        assert!(matches!(methods[1].source, InstallMethodSource::NetworkMirrorUrl { .. }));

        o.direct = true;
        assert_eq!(o.methods().len(), 3);
    }
}
