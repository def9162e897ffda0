use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Hashing scheme of a [`PackageHash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashScheme {
    /// `h1:` directory hash over the unpacked package contents.
    ///
    /// Stable across packed and unpacked forms, so it is the preferred scheme.
    H1,
    /// `zh:` SHA-256 of the zip archive as published.
    Zh,
    /// A scheme this version does not understand.
    Unknown,
}

impl HashScheme {
    /// Prefix including the trailing colon.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::H1 => "h1:",
            Self::Zh => "zh:",
            Self::Unknown => "",
        }
    }
}

/// A package checksum in `scheme:value` form, e.g. `h1:abc...=` or `zh:0f3a...`.
///
/// The raw string is preserved exactly so unknown schemes survive a
/// load/report cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageHash(String);

impl PackageHash {
    /// Wrap a `scheme:value` string without validation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Build an `h1:` hash from its base64 value.
    pub fn h1(value: &str) -> Self {
        Self(format!("h1:{value}"))
    }

    /// Build a `zh:` hash from a hex SHA-256 digest.
    pub fn zh(hex: &str) -> Self {
        Self(format!("zh:{}", hex.to_lowercase()))
    }

    /// Parse a lock-file hash string.
    ///
    /// Returns the hash and whether it used the legacy bare-hex form, which is
    /// read as `zh:` and should be reported as deprecated.
    ///
    /// # Errors
    ///
    /// Returns an error string if the value has neither a scheme nor the
    /// legacy 64-hex-character shape.
    pub fn parse(s: &str) -> Result<(Self, bool), String> {
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok((Self::zh(s), true));
        }
        match s.split_once(':') {
            Some((scheme, value)) if !scheme.is_empty() && !value.is_empty() => {
                Ok((Self(s.to_string()), false))
            }
            _ => Err(format!("invalid package hash {s:?}: expected scheme:value")),
        }
    }

    /// The scheme this hash uses.
    pub fn scheme(&self) -> HashScheme {
        if self.0.starts_with(HashScheme::H1.prefix()) {
            HashScheme::H1
        } else if self.0.starts_with(HashScheme::Zh.prefix()) {
            HashScheme::Zh
        } else {
            HashScheme::Unknown
        }
    }

    /// The part after the scheme prefix.
    pub fn value(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, v)| v)
    }

    /// Return the full `scheme:value` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PackageHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for PackageHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PackageHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .map(|(h, _)| h)
            .map_err(serde::de::Error::custom)
    }
}

/// Order hashes with the most useful scheme first (`h1`, then `zh`, then others).
pub fn preferred_order(hashes: &mut [PackageHash]) {
    hashes.sort_by(|a, b| a.scheme().cmp(&b.scheme()).then_with(|| a.cmp(b)));
}
