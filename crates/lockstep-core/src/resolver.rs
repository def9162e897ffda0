use lockstep_schema::{Version, VersionConstraints};
use thiserror::Error;

use crate::bundle::SourceBundle;
use crate::sourceaddrs::{FinalSource, SourceAddr, SourceAddrError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid location: {0}")]
    InvalidAddress(#[from] SourceAddrError),

    #[error("invalid version constraints: {0}")]
    InvalidConstraints(String),

    #[error("can't use version constraints with this source type")]
    ConstraintsNotSupported,

    #[error("no available version of {package} matches {constraints:?}")]
    NoVersionSatisfiesConstraints {
        package: String,
        constraints: String,
    },
}

/// Resolves a source address to a final source, using `bundle` to pick
/// a concrete version for registry addresses.
///
/// Final addresses pass through unchanged and must not carry constraints.
/// For a registry address the newest published version allowed by
/// `constraints` wins; an empty constraint string allows any release.
///
/// # Errors
///
/// Returns [`ResolveError`] if the address or constraints do not parse,
/// constraints accompany a final address, or no version qualifies.
pub fn resolve_final_source(
    address: &str,
    constraints: &str,
    bundle: &SourceBundle,
) -> Result<FinalSource, ResolveError> {
    let addr = SourceAddr::parse(address)?;

    let allowed = if addr.supports_version_constraints() {
        VersionConstraints::parse(constraints)
            .map_err(|e| ResolveError::InvalidConstraints(e.to_string()))?
    } else if !constraints.trim().is_empty() {
        return Err(ResolveError::ConstraintsNotSupported);
    } else {
        VersionConstraints::any()
    };

    match addr {
        SourceAddr::Local(l) => Ok(FinalSource::Local(l)),
        SourceAddr::Remote(r) => Ok(FinalSource::Remote(r)),
        SourceAddr::RegistryFinal(r) => Ok(FinalSource::Registry(r)),
        SourceAddr::Registry(r) => {
            let available = bundle.registry_package_versions(&r.package);
            let selected: Version = allowed.newest(&available).cloned().ok_or_else(|| {
                ResolveError::NoVersionSatisfiesConstraints {
                    package: r.package.to_string(),
                    constraints: allowed.to_string(),
                }
            })?;
            tracing::debug!(package = %r.package, version = %selected, "selected registry version");
            Ok(FinalSource::Registry(r.versioned(selected)))
        }
    }
}
