//! Dependency lock files.
//!
//! The lock file (`deps.lock.toml`) records exactly which version of each
//! provider a configuration has committed to, and which package checksums
//! are acceptable for it:
//!
//! ```toml
//! [[provider]]
//! source = "registry.terraform.io/hashicorp/aws"
//! version = "5.31.0"
//! constraints = ">= 5.0"
//! hashes = [
//!   "h1:Vnk0o5sVQ2k9ERd8FW5W7lHMXamkjrM1o2jUbwJa0ww=",
//!   "zh:1f4f2a0d1e5f1e0a4f8bfb0c2a7b9c3f5f7d6e4c3b2a1908f7e6d5c4b3a29180",
//! ]
//! ```
//!
//! Loading never fails outright: problems come back as diagnostics, and the
//! caller only gets a [`LockSet`] if none of them are errors.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use lockstep_schema::{
    Diagnostic, Diagnostics, HashScheme, PackageHash, Provider, Version, VersionConstraints,
    preferred_order,
};
use serde::Deserialize;

/// Conventional lock file name.
pub const LOCK_FILE_NAME: &str = "deps.lock.toml";

#[derive(Debug, Deserialize)]
struct RawLockFile {
    #[serde(default, rename = "provider")]
    providers: Vec<RawProviderLock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProviderLock {
    source: String,
    version: String,
    #[serde(default)]
    constraints: Option<String>,
    #[serde(default)]
    hashes: Vec<String>,
}

/// The selection recorded for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLock {
    provider: Provider,
    version: Version,
    constraints: VersionConstraints,
    hashes: Vec<PackageHash>,
}

impl ProviderLock {
    pub fn new(
        provider: Provider,
        version: Version,
        constraints: VersionConstraints,
        hashes: Vec<PackageHash>,
    ) -> Self {
        Self {
            provider,
            version,
            constraints,
            hashes,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The constraints that were in effect when the version was selected.
    /// Informational only.
    pub fn version_constraints(&self) -> &VersionConstraints {
        &self.constraints
    }

    /// All acceptable hashes in file order.
    pub fn all_hashes(&self) -> &[PackageHash] {
        &self.hashes
    }

    /// Acceptable hashes with the preferred schemes first.
    pub fn preferred_hashes(&self) -> Vec<PackageHash> {
        let mut hashes = self.hashes.clone();
        preferred_order(&mut hashes);
        hashes
    }

    /// Returns `true` if `hash` is one of the acceptable hashes.
    pub fn accepts(&self, hash: &PackageHash) -> bool {
        self.hashes.contains(hash)
    }
}

/// Immutable set of provider locks.
#[derive(Debug, Clone, Default)]
pub struct LockSet {
    providers: HashMap<Provider, ProviderLock>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace the lock for one provider.
    pub fn set_provider(&mut self, lock: ProviderLock) {
        self.providers.insert(lock.provider.clone(), lock);
    }

    /// Every locked provider. Iteration order is unspecified.
    pub fn all_providers(&self) -> &HashMap<Provider, ProviderLock> {
        &self.providers
    }

    pub fn provider(&self, provider: &Provider) -> Option<&ProviderLock> {
        self.providers.get(provider)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Load a lock file from disk.
///
/// The set is `None` whenever the diagnostics contain an error.
pub fn load_locks_from_file(path: &Path) -> (Option<LockSet>, Diagnostics) {
    match fs::read_to_string(path) {
        Ok(src) => load_locks_from_str(&src, &path.display().to_string()),
        Err(e) => {
            let mut diags = Diagnostics::new();
            diags.push(Diagnostic::error(
                "Failed to read dependency lock file",
                format!("The dependency lock file {} could not be read: {e}.", path.display()),
            ));
            (None, diags)
        }
    }
}

/// Parse lock file contents. `filename` is only used in diagnostics.
pub fn load_locks_from_str(src: &str, filename: &str) -> (Option<LockSet>, Diagnostics) {
    let mut diags = Diagnostics::new();

    let raw: RawLockFile = match toml::from_str(src) {
        Ok(raw) => raw,
        Err(e) => {
            diags.push(Diagnostic::error(
                "Invalid dependency lock file syntax",
                format!("{filename}: {e}"),
            ));
            return (None, diags);
        }
    };

    let mut locks = LockSet::new();
    for entry in raw.providers {
        if let Some(lock) = parse_provider_lock(entry, filename, &mut diags) {
            if locks.provider(&lock.provider).is_some() {
                diags.push(Diagnostic::error(
                    "Duplicate provider lock",
                    format!(
                        "{filename}: this file already has a lock entry for provider {}.",
                        lock.provider.for_display()
                    ),
                ));
                continue;
            }
            locks.set_provider(lock);
        }
    }

    if diags.has_errors() {
        (None, diags)
    } else {
        (Some(locks), diags)
    }
}

fn parse_provider_lock(
    entry: RawProviderLock,
    filename: &str,
    diags: &mut Diagnostics,
) -> Option<ProviderLock> {
    let provider = match Provider::parse(&entry.source) {
        Ok(p) => p,
        Err(e) => {
            diags.push(Diagnostic::error(
                "Invalid provider source address",
                format!("{filename}: {e}."),
            ));
            return None;
        }
    };

    let version = match Version::parse(&entry.version) {
        Ok(v) => v,
        Err(_) => {
            diags.push(Diagnostic::error(
                "Invalid provider version number",
                format!(
                    "{filename}: the selected version number {:?} for provider {} is not valid.",
                    entry.version,
                    provider.for_display()
                ),
            ));
            return None;
        }
    };

    let constraints = match entry.constraints.as_deref().map(VersionConstraints::parse) {
        None => VersionConstraints::any(),
        Some(Ok(c)) => c,
        Some(Err(e)) => {
            diags.push(Diagnostic::error(
                "Invalid version constraints",
                format!(
                    "{filename}: the recorded constraints for provider {} are not valid: {e}.",
                    provider.for_display()
                ),
            ));
            return None;
        }
    };

    let mut hashes = Vec::with_capacity(entry.hashes.len());
    let mut hashes_ok = true;
    for raw in &entry.hashes {
        match PackageHash::parse(raw) {
            Ok((hash, legacy)) => {
                if legacy {
                    diags.push(Diagnostic::warning(
                        "Deprecated hash scheme",
                        format!(
                            "{filename}: provider {} has a checksum without a scheme prefix; it is treated as \"zh:\" but should be re-recorded.",
                            provider.for_display()
                        ),
                    ));
                } else if hash.scheme() == HashScheme::Unknown {
                    diags.push(Diagnostic::warning(
                        "Unsupported hash scheme",
                        format!(
                            "{filename}: provider {} has checksum {raw:?} with a scheme this version cannot verify; it will never match.",
                            provider.for_display()
                        ),
                    ));
                }
                if !hashes.contains(&hash) {
                    hashes.push(hash);
                }
            }
            Err(e) => {
                diags.push(Diagnostic::error(
                    "Invalid provider hash",
                    format!("{filename}: provider {}: {e}.", provider.for_display()),
                ));
                hashes_ok = false;
            }
        }
    }
    if !hashes_ok {
        return None;
    }

    Some(ProviderLock::new(provider, version, constraints, hashes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_schema::Severity;
    use tempfile::TempDir;

    const HEX: &str = "1f4f2a0d1e5f1e0a4f8bfb0c2a7b9c3f5f7d6e4c3b2a1908f7e6d5c4b3a29180";

    #[test]
    fn loads_valid_file() {
        let src = format!(
            r#"
[[provider]]
source = "registry.terraform.io/hashicorp/aws"
version = "5.31.0"
constraints = ">= 5.0"
hashes = ["zh:{HEX}", "h1:abc="]

[[provider]]
source = "example.com/acme/widget"
version = "0.1.0"
"#
        );
        let (locks, diags) = load_locks_from_str(&src, "deps.lock.toml");
        assert!(diags.is_empty(), "{diags:?}");
        let locks = locks.unwrap();
        assert_eq!(locks.len(), 2);

        let aws = locks
            .provider(&Provider::parse("hashicorp/aws").unwrap())
            .unwrap();
        assert_eq!(aws.version(), &Version::new(5, 31, 0));
        assert_eq!(aws.version_constraints().to_string(), ">= 5.0.0");
        assert_eq!(aws.preferred_hashes()[0].as_str(), "h1:abc=");

        let widget = locks
            .provider(&Provider::parse("example.com/acme/widget").unwrap())
            .unwrap();
        assert!(widget.all_hashes().is_empty());
    }

    #[test]
    fn legacy_hash_is_a_warning() {
        let src = format!(
            "[[provider]]\nsource = \"hashicorp/null\"\nversion = \"3.2.1\"\nhashes = [\"{HEX}\"]\n"
        );
        let (locks, diags) = load_locks_from_str(&src, "deps.lock.toml");
        assert!(locks.is_some());
        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.severity, Severity::Warning);
        assert_eq!(diag.summary, "Deprecated hash scheme");
    }

    #[test]
    fn malformed_files_yield_no_set() {
        let (locks, diags) = load_locks_from_str("[[provider]\n", "bad.toml");
        assert!(locks.is_none());
        assert!(diags.has_errors());

        let (locks, diags) = load_locks_from_str(
            "[[provider]]\nsource = \"not a provider!\"\nversion = \"1.0.0\"\n",
            "bad.toml",
        );
        assert!(locks.is_none());
        assert_eq!(
            diags.iter().next().unwrap().summary,
            "Invalid provider source address"
        );

        let (locks, _) = load_locks_from_str(
            "[[provider]]\nsource = \"hashicorp/null\"\nversion = \">= 1.0\"\n",
            "bad.toml",
        );
        assert!(locks.is_none());
    }

    #[test]
    fn duplicate_providers_are_errors() {
        let src = "[[provider]]\nsource = \"hashicorp/null\"\nversion = \"1.0.0\"\n\n[[provider]]\nsource = \"registry.terraform.io/hashicorp/null\"\nversion = \"2.0.0\"\n";
        let (locks, diags) = load_locks_from_str(src, "dup.toml");
        assert!(locks.is_none());
        assert_eq!(diags.iter().next().unwrap().summary, "Duplicate provider lock");
    }

    #[test]
    fn missing_file_is_a_diagnostic() {
        let dir = TempDir::new().unwrap();
        let (locks, diags) = load_locks_from_file(&dir.path().join(LOCK_FILE_NAME));
        assert!(locks.is_none());
        assert_eq!(
            diags.iter().next().unwrap().summary,
            "Failed to read dependency lock file"
        );
    }

    #[test]
    fn empty_file_is_an_empty_set() {
        let (locks, diags) = load_locks_from_str("", "empty.toml");
        assert!(diags.is_empty());
        assert!(locks.unwrap().is_empty());
    }
}
