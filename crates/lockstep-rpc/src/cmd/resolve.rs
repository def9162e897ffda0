//! Resolve command

use std::path::Path;

use anyhow::{Context, Result};

use crate::DependenciesService;
use crate::wire::SourceAddress;

/// Resolve a source address against a bundle and print the final address.
pub fn resolve(service: &DependenciesService, bundle: &Path, address: &str, versions: &str) -> Result<()> {
    let bundle_handle = service
        .open_source_bundle(bundle)
        .with_context(|| format!("Failed to open source bundle {}", bundle.display()))?;

    let resolved = service.resolve_source_address(
        bundle_handle,
        &SourceAddress {
            source: address.to_string(),
            versions: versions.to_string(),
        },
    );
    service.close_source_bundle(bundle_handle)?;

    println!("{}", resolved?);
    Ok(())
}
