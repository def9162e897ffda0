//! Source addresses for configuration packages.
//!
//! Four shapes are recognised:
//!
//! ```text
//! ./modules/net                                   local (final, relative)
//! git::https://example.com/infra.git//net?ref=v1  remote (final)
//! example.com/acme/net/aws//sub                   registry (needs a version)
//! example.com/acme/net/aws@1.2.0//sub             registry, versioned (final)
//! ```
//!
//! Only the unversioned registry shape accepts version constraints.

use std::fmt;

use lockstep_schema::{DEFAULT_REGISTRY_HOST, Version};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceAddrError {
    #[error("source address must not be empty")]
    Empty,

    #[error("absolute filesystem paths are not allowed as source addresses: {0:?}")]
    AbsolutePath(String),

    #[error("unsupported remote source type {0:?}")]
    UnsupportedType(String),

    #[error("invalid remote source URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid registry address {addr:?}: {reason}")]
    InvalidRegistry { addr: String, reason: String },

    #[error("invalid sub-path {0:?}: must not escape the package")]
    InvalidSubPath(String),
}

/// A relative path inside the package that contains the referring file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSource {
    pub rel_path: String,
}

/// The fetchable unit behind a remote source: source type plus URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePackage {
    /// `git`, `http` or `https`.
    pub type_: String,
    /// URL including any query string.
    pub url: String,
}

impl fmt::Display for RemotePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // http and https are implied by the URL scheme itself.
        if self.url.starts_with(&format!("{}://", self.type_)) {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}::{}", self.type_, self.url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteSource {
    pub package: RemotePackage,
    pub subdir: String,
}

/// A package family in a module registry: `host/namespace/name/system`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryPackage {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub target_system: String,
}

impl fmt::Display for RegistryPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.host, self.namespace, self.name, self.target_system
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySource {
    pub package: RegistryPackage,
    pub subdir: String,
}

impl RegistrySource {
    /// Pin this address to one exact version.
    pub fn versioned(&self, version: Version) -> RegistrySourceFinal {
        RegistrySourceFinal {
            package: self.package.clone(),
            version,
            subdir: self.subdir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySourceFinal {
    pub package: RegistryPackage,
    pub version: Version,
    pub subdir: String,
}

/// Any parsed source address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceAddr {
    Local(LocalSource),
    Remote(RemoteSource),
    Registry(RegistrySource),
    RegistryFinal(RegistrySourceFinal),
}

/// A source address that names exactly one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FinalSource {
    Local(LocalSource),
    Remote(RemoteSource),
    Registry(RegistrySourceFinal),
}

impl SourceAddr {
    /// Parse any supported source address shape.
    ///
    /// # Errors
    ///
    /// Returns [`SourceAddrError`] describing the first problem found.
    pub fn parse(s: &str) -> Result<Self, SourceAddrError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SourceAddrError::Empty);
        }
        if s.starts_with("./") || s.starts_with("../") {
            return Ok(Self::Local(LocalSource {
                rel_path: s.trim_end_matches('/').to_string(),
            }));
        }
        if s.starts_with('/') {
            return Err(SourceAddrError::AbsolutePath(s.to_string()));
        }
        if s.contains("::") || s.contains("://") {
            return parse_remote(s).map(Self::Remote);
        }
        parse_registry(s)
    }

    /// Returns `true` if version constraints may accompany this address.
    pub fn supports_version_constraints(&self) -> bool {
        matches!(self, Self::Registry(_))
    }
}

impl fmt::Display for SourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(l) => write!(f, "{}", l.rel_path),
            Self::Remote(r) => fmt_remote(f, r),
            Self::Registry(r) => {
                write!(f, "{}", r.package)?;
                fmt_subdir(f, &r.subdir)
            }
            Self::RegistryFinal(r) => fmt_registry_final(f, r),
        }
    }
}

impl fmt::Display for FinalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(l) => write!(f, "{}", l.rel_path),
            Self::Remote(r) => fmt_remote(f, r),
            Self::Registry(r) => fmt_registry_final(f, r),
        }
    }
}

fn fmt_subdir(f: &mut fmt::Formatter<'_>, subdir: &str) -> fmt::Result {
    if subdir.is_empty() {
        Ok(())
    } else {
        write!(f, "//{subdir}")
    }
}

fn fmt_remote(f: &mut fmt::Formatter<'_>, r: &RemoteSource) -> fmt::Result {
    // The sub-path sits between the URL path and its query string.
    let pkg = r.package.to_string();
    match pkg.split_once('?') {
        Some((base, query)) => {
            write!(f, "{base}")?;
            fmt_subdir(f, &r.subdir)?;
            write!(f, "?{query}")
        }
        None => {
            write!(f, "{pkg}")?;
            fmt_subdir(f, &r.subdir)
        }
    }
}

fn fmt_registry_final(f: &mut fmt::Formatter<'_>, r: &RegistrySourceFinal) -> fmt::Result {
    write!(f, "{}@{}", r.package, r.version)?;
    fmt_subdir(f, &r.subdir)
}

fn clean_subdir(raw: &str) -> Result<String, SourceAddrError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.split('/').any(|c| c == "..") {
        return Err(SourceAddrError::InvalidSubPath(raw.to_string()));
    }
    Ok(trimmed
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/"))
}

fn parse_remote(s: &str) -> Result<RemoteSource, SourceAddrError> {
    let (forced, rest) = match s.split_once("::") {
        Some((t, rest)) => (Some(t), rest),
        None => (None, s),
    };

    let Some((scheme, after_scheme)) = rest.split_once("://") else {
        return Err(SourceAddrError::InvalidUrl {
            url: rest.to_string(),
            reason: "missing URL scheme".to_string(),
        });
    };

    let type_ = match forced {
        Some(t @ ("git" | "http" | "https")) => t.to_string(),
        Some(other) => return Err(SourceAddrError::UnsupportedType(other.to_string())),
        None if scheme == "http" || scheme == "https" => scheme.to_string(),
        None => return Err(SourceAddrError::UnsupportedType(scheme.to_string())),
    };

    let (path_part, query) = match after_scheme.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (after_scheme, None),
    };
    let (path_part, subdir) = match path_part.split_once("//") {
        Some((p, sub)) => (p, clean_subdir(sub)?),
        None => (path_part, String::new()),
    };

    let mut url = format!("{scheme}://{path_part}");
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    reqwest::Url::parse(&url).map_err(|e| SourceAddrError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    Ok(RemoteSource {
        package: RemotePackage { type_, url },
        subdir,
    })
}

fn parse_registry(s: &str) -> Result<SourceAddr, SourceAddrError> {
    let invalid = |reason: &str| SourceAddrError::InvalidRegistry {
        addr: s.to_string(),
        reason: reason.to_string(),
    };

    let (pkg_part, subdir) = match s.split_once("//") {
        Some((p, sub)) => (p, clean_subdir(sub)?),
        None => (s, String::new()),
    };

    let parts: Vec<&str> = pkg_part.split('/').collect();
    let (host, namespace, name, system) = match parts.as_slice() {
        [ns, n, sys] => (DEFAULT_REGISTRY_HOST.to_string(), *ns, *n, *sys),
        [h, ns, n, sys] => (h.to_lowercase(), *ns, *n, *sys),
        _ => return Err(invalid("expected [hostname/]namespace/name/system")),
    };

    if !lockstep_schema::addrs::is_valid_hostname(&host) {
        return Err(invalid("invalid hostname"));
    }

    let (system, version) = match system.split_once('@') {
        Some((sys, v)) => {
            let v = Version::parse(v).map_err(|_| invalid("invalid version after '@'"))?;
            (sys, Some(v))
        }
        None => (system, None),
    };

    let valid_part = |p: &str| {
        !p.is_empty()
            && p.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    if !valid_part(namespace) {
        return Err(invalid("invalid namespace"));
    }
    if !valid_part(name) {
        return Err(invalid("invalid module name"));
    }
    if !valid_part(system) {
        return Err(invalid("invalid target system"));
    }

    let package = RegistryPackage {
        host,
        namespace: namespace.to_string(),
        name: name.to_string(),
        target_system: system.to_lowercase(),
    };

    Ok(match version {
        Some(version) => SourceAddr::RegistryFinal(RegistrySourceFinal {
            package,
            version,
            subdir,
        }),
        None => SourceAddr::Registry(RegistrySource { package, subdir }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_sources() {
        let addr = SourceAddr::parse("./modules/net/").unwrap();
        assert_eq!(
            addr,
            SourceAddr::Local(LocalSource {
                rel_path: "./modules/net".into()
            })
        );
        assert!(!addr.supports_version_constraints());
        assert!(matches!(
            SourceAddr::parse("/etc/passwd"),
            Err(SourceAddrError::AbsolutePath(_))
        ));
    }

    #[test]
    fn remote_sources_with_subdir_and_query() {
        let addr = SourceAddr::parse("git::https://example.com/infra.git//net/vpc?ref=v1.0.0")
            .unwrap();
        let SourceAddr::Remote(r) = &addr else {
            panic!("expected remote, got {addr:?}");
        };
        assert_eq!(r.package.type_, "git");
        assert_eq!(r.package.url, "https://example.com/infra.git?ref=v1.0.0");
        assert_eq!(r.subdir, "net/vpc");
        assert_eq!(
            addr.to_string(),
            "git::https://example.com/infra.git//net/vpc?ref=v1.0.0"
        );
    }

    #[test]
    fn plain_https_is_remote() {
        let addr = SourceAddr::parse("https://example.com/bundle.tar.gz").unwrap();
        let SourceAddr::Remote(r) = addr else {
            panic!("expected remote");
        };
        assert_eq!(r.package.type_, "https");
        assert_eq!(r.package.to_string(), "https://example.com/bundle.tar.gz");
    }

    #[test]
    fn rejects_unknown_remote_types() {
        assert!(matches!(
            SourceAddr::parse("s3::https://bucket/x"),
            Err(SourceAddrError::UnsupportedType(_))
        ));
        assert!(matches!(
            SourceAddr::parse("ftp://example.com/x"),
            Err(SourceAddrError::UnsupportedType(_))
        ));
        assert!(matches!(
            SourceAddr::parse("git::https://example.com/x//../../etc"),
            Err(SourceAddrError::InvalidSubPath(_))
        ));
    }

    #[test]
    fn registry_sources() {
        let addr = SourceAddr::parse("acme/net/aws//modules/vpc").unwrap();
        let SourceAddr::Registry(r) = &addr else {
            panic!("expected registry");
        };
        assert_eq!(r.package.host, DEFAULT_REGISTRY_HOST);
        assert_eq!(r.subdir, "modules/vpc");
        assert!(addr.supports_version_constraints());

        let pinned = r.versioned(Version::new(1, 2, 0));
        assert_eq!(
            FinalSource::Registry(pinned).to_string(),
            "registry.terraform.io/acme/net/aws@1.2.0//modules/vpc"
        );
    }

    #[test]
    fn versioned_registry_is_final() {
        let addr = SourceAddr::parse("example.com/acme/net/aws@2.0.1").unwrap();
        assert!(matches!(addr, SourceAddr::RegistryFinal(ref r) if r.version == Version::new(2, 0, 1)));
        assert!(!addr.supports_version_constraints());
    }

    #[test]
    fn rejects_malformed_registry() {
        assert!(SourceAddr::parse("acme/net").is_err());
        assert!(SourceAddr::parse("a/b/c/d/e").is_err());
        assert!(SourceAddr::parse("acme/n et/aws").is_err());
        assert!(SourceAddr::parse("acme/net/aws@banana").is_err());
        assert!(matches!(SourceAddr::parse("  "), Err(SourceAddrError::Empty)));
    }
}
