use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{BUILTIN_PROVIDER_HOST, BUILTIN_PROVIDER_NAMESPACE, DEFAULT_REGISTRY_HOST};

/// Errors produced while parsing a provider source address.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderAddrError {
    /// The address was empty or had more than three slash-separated parts.
    #[error("invalid provider address {0:?}: expected [hostname/]namespace/type")]
    Shape(String),

    /// The hostname part is not a plausible DNS name (with optional port).
    #[error("invalid provider address {addr:?}: invalid hostname {host:?}")]
    Hostname {
        /// The full address being parsed.
        addr: String,
        /// The offending hostname.
        host: String,
    },

    /// A namespace or type part contains forbidden characters.
    #[error("invalid provider address {addr:?}: invalid {part} {value:?}")]
    Part {
        /// The full address being parsed.
        addr: String,
        /// Which part failed ("namespace" or "type").
        part: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Identity of a provider: `hostname/namespace/type`.
///
/// Ordering is lexicographic on the full string form, which is what callers
/// use when they want stable output.
///
/// # Example
///
/// ```
/// use lockstep_schema::Provider;
///
/// let p: Provider = "hashicorp/aws".parse().unwrap();
/// assert_eq!(p.to_string(), "registry.terraform.io/hashicorp/aws");
/// assert_eq!(p.for_display(), "hashicorp/aws");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Provider {
    /// Registry hostname, lowercase, possibly with a `:port` suffix.
    pub hostname: String,
    /// Publishing namespace, lowercase.
    pub namespace: String,
    /// Provider type name, lowercase.
    pub type_: String,
}

impl Provider {
    /// Build a provider address from already-validated parts.
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        type_: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            type_: type_.into(),
        }
    }

    /// Address of a built-in provider with the given type name.
    pub fn builtin(type_: impl Into<String>) -> Self {
        Self::new(BUILTIN_PROVIDER_HOST, BUILTIN_PROVIDER_NAMESPACE, type_)
    }

    /// Parse `[hostname/]namespace/type` or a bare `type`.
    ///
    /// A missing hostname defaults to the public registry and a bare type
    /// defaults to the `hashicorp` namespace. All parts are lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderAddrError`] if the shape or any part is invalid.
    pub fn parse(s: &str) -> Result<Self, ProviderAddrError> {
        let parts: Vec<&str> = s.split('/').collect();
        let (host, namespace, type_) = match parts.as_slice() {
            [t] if !t.is_empty() => (DEFAULT_REGISTRY_HOST, "hashicorp", *t),
            [ns, t] => (DEFAULT_REGISTRY_HOST, *ns, *t),
            [h, ns, t] => (*h, *ns, *t),
            _ => return Err(ProviderAddrError::Shape(s.to_string())),
        };

        let host = host.to_lowercase();
        if !is_valid_hostname(&host) {
            return Err(ProviderAddrError::Hostname {
                addr: s.to_string(),
                host,
            });
        }

        let namespace = namespace.to_lowercase();
        if !is_valid_part(&namespace) {
            return Err(ProviderAddrError::Part {
                addr: s.to_string(),
                part: "namespace",
                value: namespace,
            });
        }

        let type_ = type_.to_lowercase();
        if !is_valid_part(&type_) {
            return Err(ProviderAddrError::Part {
                addr: s.to_string(),
                part: "type",
                value: type_,
            });
        }

        Ok(Self {
            hostname: host,
            namespace,
            type_,
        })
    }

    /// Returns `true` for providers compiled into the host program.
    pub fn is_builtin(&self) -> bool {
        self.hostname == BUILTIN_PROVIDER_HOST && self.namespace == BUILTIN_PROVIDER_NAMESPACE
    }

    /// Short form for humans: the hostname is omitted for the public registry.
    pub fn for_display(&self) -> String {
        if self.hostname == DEFAULT_REGISTRY_HOST {
            format!("{}/{}", self.namespace, self.type_)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_)
    }
}

impl FromStr for Provider {
    type Err = ProviderAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Provider {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Provider {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Returns `true` for dot-separated labels of `[a-z0-9-]` with an optional
/// numeric `:port` suffix. Callers lowercase first.
pub fn is_valid_hostname(host: &str) -> bool {
    let (name, port) = match host.rsplit_once(':') {
        Some((n, p)) => (n, Some(p)),
        None => (host, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    !name.is_empty()
        && name.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
}

pub(crate) fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part.len() <= 64
        && !part.starts_with('-')
        && !part.ends_with('-')
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
