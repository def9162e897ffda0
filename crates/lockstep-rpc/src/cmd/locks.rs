//! Locks command

use std::path::Path;

use anyhow::{Context, Result, bail};

use super::{print_json, report_diagnostics};
use crate::DependenciesService;
use crate::wire::SourceAddress;

/// Print every provider selected by a lock file in `bundle`.
pub fn locks(service: &DependenciesService, bundle: &Path, address: &str, versions: &str) -> Result<()> {
    let bundle_handle = service
        .open_source_bundle(bundle)
        .with_context(|| format!("Failed to open source bundle {}", bundle.display()))?;

    let address = SourceAddress {
        source: address.to_string(),
        versions: versions.to_string(),
    };
    let opened = service.open_dependency_lock_file(bundle_handle, &address)?;
    report_diagnostics(&opened.diagnostics);
    let Some(locks_handle) = opened.dependency_locks_handle else {
        bail!("Dependency lock file {} is not usable", address.source);
    };

    for provider in service.get_locked_provider_dependencies(locks_handle)? {
        print_json(&provider)?;
    }

    service.close_dependency_locks(locks_handle)?;
    service.close_source_bundle(bundle_handle)?;
    Ok(())
}
