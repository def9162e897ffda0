use std::sync::Arc;

use async_trait::async_trait;
use lockstep_schema::{Platform, Provider, Version};
use tracing::debug;

use super::{PackageMeta, Source, SourceError, VersionList};

/// Sources consulted in priority order.
///
/// The first source that can supply a provider wins; a source that doesn't
/// know the provider (or version, or platform) hands over to the next one.
/// Real failures are remembered and only reported when no later source
/// succeeds.
#[derive(Clone)]
pub struct MultiSource {
    sources: Vec<Arc<dyn Source>>,
}

impl std::fmt::Debug for MultiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.describe()))
            .finish()
    }
}

/// The outcome of looking up one locked version.
#[derive(Debug)]
pub struct FoundPackage {
    pub warnings: Vec<String>,
    pub meta: PackageMeta,
}

impl MultiSource {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Find the first source offering `version` of `provider` for `platform`.
    pub async fn find_package(
        &self,
        provider: &Provider,
        version: &Version,
        platform: &Platform,
    ) -> Result<FoundPackage, SourceError> {
        let mut remembered: Option<SourceError> = None;

        for source in &self.sources {
            let list = match source.available_versions(provider).await {
                Ok(list) => list,
                Err(e) => {
                    debug!(%provider, source = %source.describe(), error = %e, "source skipped");
                    remember(&mut remembered, e);
                    continue;
                }
            };
            if !list.contains(version) {
                remember(
                    &mut remembered,
                    SourceError::VersionNotFound {
                        provider: provider.to_string(),
                        version: version.to_string(),
                        origin: source.describe(),
                    },
                );
                continue;
            }

            match source.package_meta(provider, version, platform).await {
                Ok(meta) => {
                    return Ok(FoundPackage {
                        warnings: list.warnings,
                        meta,
                    });
                }
                Err(e) => {
                    debug!(%provider, source = %source.describe(), error = %e, "source skipped");
                    remember(&mut remembered, e);
                }
            }
        }

        Err(remembered.unwrap_or_else(|| SourceError::ProviderNotFound {
            provider: provider.to_string(),
            origin: "any configured installation method".to_string(),
        }))
    }
}

/// Keep the most informative error: real failures beat "not here", and a
/// later "not here" beats an earlier one.
fn remember(slot: &mut Option<SourceError>, err: SourceError) {
    let keep_existing = matches!(slot, Some(existing) if !existing.is_not_found()) && err.is_not_found();
    if !keep_existing {
        *slot = Some(err);
    }
}

#[async_trait]
impl Source for MultiSource {
    /// Union of the versions every reachable source offers.
    async fn available_versions(&self, provider: &Provider) -> Result<VersionList, SourceError> {
        let mut merged = VersionList::default();
        let mut remembered = None;
        let mut any_ok = false;

        for source in &self.sources {
            match source.available_versions(provider).await {
                Ok(list) => {
                    any_ok = true;
                    merged.versions.extend(list.versions);
                    merged.warnings.extend(list.warnings);
                }
                Err(e) => remember(&mut remembered, e),
            }
        }

        if !any_ok {
            return Err(remembered.unwrap_or_else(|| SourceError::ProviderNotFound {
                provider: provider.to_string(),
                origin: self.describe(),
            }));
        }
        merged.versions.sort();
        merged.versions.dedup();
        Ok(merged)
    }

    async fn package_meta(
        &self,
        provider: &Provider,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError> {
        self.find_package(provider, version, platform)
            .await
            .map(|found| found.meta)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.sources.iter().map(|s| s.describe()).collect();
        format!("[{}]", parts.join(", "))
    }
}
