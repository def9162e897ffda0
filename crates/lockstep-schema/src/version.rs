//! Versions and Ruby-style version constraint sets.
//!
//! Constraint syntax is a comma-separated conjunction of `op version` terms
//! where `op` is one of `=`, `!=`, `>`, `>=`, `<`, `<=` or `~>`. A term with
//! no operator means `=`. The empty string allows any release version.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Errors produced while parsing versions or constraint strings.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version string is not `MAJOR[.MINOR[.PATCH]][-PRE][+BUILD]`.
    #[error("invalid version {0:?}")]
    Invalid(String),

    /// A constraint term is empty or has no version after its operator.
    #[error("invalid version constraint {0:?}")]
    InvalidConstraint(String),
}

/// A provider or package version.
///
/// Parsing is lenient about precision: `1` and `1.2` are read as `1.0.0`
/// and `1.2.0`, and a leading `v` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Build a release version from numeric parts.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Invalid`] if the string is not a version.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        Self::parse_with_precision(s).map(|(v, _)| v)
    }

    /// Parse a version and report how many numeric components were written.
    fn parse_with_precision(s: &str) -> Result<(Self, u8), VersionError> {
        let invalid = || VersionError::Invalid(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(split_at);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty()
            || parts.len() > 3
            || parts
                .iter()
                .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(invalid());
        }
        let precision = parts.len() as u8;

        let mut full = parts.join(".");
        for _ in parts.len()..3 {
            full.push_str(".0");
        }
        full.push_str(suffix);

        semver::Version::parse(&full)
            .map(|v| (Self(v), precision))
            .map_err(|_| invalid())
    }

    /// Returns `true` if the version carries a prerelease suffix.
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Borrow the underlying semantic version.
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Self(v)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Comparison operator of a single constraint term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOp {
    /// `=` (also written with no operator)
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `~>`: allows the rightmost written component to increase.
    Pessimistic,
}

impl ConstraintOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

/// One term of a constraint set, e.g. `>= 1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// The comparison operator.
    pub op: ConstraintOp,
    /// The version compared against.
    pub version: Version,
    /// Number of numeric components written (1..=3); only `~>` depends on it.
    pub precision: u8,
}

impl Constraint {
    /// Returns `true` if `v` satisfies this term alone.
    ///
    /// Comparisons use semver precedence, so build metadata is ignored.
    pub fn matches(&self, v: &Version) -> bool {
        let ord = v.0.cmp_precedence(&self.version.0);
        match self.op {
            ConstraintOp::Eq => ord == Ordering::Equal,
            ConstraintOp::Ne => ord != Ordering::Equal,
            ConstraintOp::Gt => ord == Ordering::Greater,
            ConstraintOp::Ge => ord != Ordering::Less,
            ConstraintOp::Lt => ord == Ordering::Less,
            ConstraintOp::Le => ord != Ordering::Greater,
            ConstraintOp::Pessimistic => {
                if ord == Ordering::Less {
                    return false;
                }
                let base = &self.version.0;
                let upper = if self.precision >= 3 {
                    semver::Version::new(base.major, base.minor + 1, 0)
                } else {
                    semver::Version::new(base.major + 1, 0, 0)
                };
                // Compare without prerelease so 2.0.0-beta is still excluded by "< 2.0.0".
                let release = semver::Version::new(v.0.major, v.0.minor, v.0.patch);
                release < upper
            }
        }
    }

    fn parse(term: &str) -> Result<Self, VersionError> {
        let term = term.trim();
        let ops = [
            ("~>", ConstraintOp::Pessimistic),
            (">=", ConstraintOp::Ge),
            ("<=", ConstraintOp::Le),
            ("!=", ConstraintOp::Ne),
            (">", ConstraintOp::Gt),
            ("<", ConstraintOp::Lt),
            ("=", ConstraintOp::Eq),
        ];
        let (op, rest) = ops
            .iter()
            .find_map(|(prefix, op)| term.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((ConstraintOp::Eq, term));

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(VersionError::InvalidConstraint(term.to_string()));
        }
        let (version, precision) = Version::parse_with_precision(rest)
            .map_err(|_| VersionError::InvalidConstraint(term.to_string()))?;

        Ok(Self {
            op,
            version,
            precision,
        })
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version.0;
        match (self.op, self.precision) {
            (ConstraintOp::Pessimistic, 1) => write!(f, "~> {}", v.major),
            (ConstraintOp::Pessimistic, 2) => write!(f, "~> {}.{}", v.major, v.minor),
            (ConstraintOp::Eq, _) => write!(f, "{v}"),
            (op, _) => write!(f, "{} {v}", op.as_str()),
        }
    }
}

/// A conjunction of constraint terms. Empty means "any release version".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionConstraints(Vec<Constraint>);

impl VersionConstraints {
    /// The unconstrained set.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a comma-separated constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidConstraint`] for the first bad term.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        if s.trim().is_empty() {
            return Ok(Self::any());
        }
        s.split(',')
            .map(Constraint::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Returns `true` if no terms are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The individual terms.
    pub fn terms(&self) -> &[Constraint] {
        &self.0
    }

    /// Returns `true` if `v` satisfies every term.
    ///
    /// A prerelease is only allowed when an `=` term names it exactly.
    pub fn allows(&self, v: &Version) -> bool {
        if v.is_prerelease()
            && !self
                .0
                .iter()
                .any(|c| c.op == ConstraintOp::Eq && c.version == *v)
        {
            return false;
        }
        self.0.iter().all(|c| c.matches(v))
    }

    /// Newest version from `versions` allowed by this set.
    pub fn newest<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.allows(v)).max()
    }
}

impl fmt::Display for VersionConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionConstraints {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
