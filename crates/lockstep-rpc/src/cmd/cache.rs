//! Cache command

use std::path::Path;

use anyhow::Result;

use super::print_json;
use crate::DependenciesService;

/// List the packages in a plugin cache, one JSON line each.
pub async fn cache(service: &DependenciesService, dir: &Path, platform: &str) -> Result<()> {
    let handle = service.open_provider_plugin_cache(dir, platform)?;
    let packages = service.get_cached_providers(handle).await?;
    service.close_provider_plugin_cache(handle)?;

    if packages.is_empty() {
        tracing::info!(dir = %dir.display(), "no cached providers");
    }
    for pkg in &packages {
        print_json(pkg)?;
    }
    Ok(())
}
