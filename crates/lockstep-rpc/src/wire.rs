//! Wire-shaped request and event types.
//!
//! Handles are plain `i64`s and addresses are strings, so these types can be
//! carried by any transport. The CLI prints events as JSON lines.

use std::path::PathBuf;

use lockstep_schema::Diagnostic;
use serde::{Deserialize, Serialize};

/// A source address plus optional version constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub source: String,
    #[serde(default)]
    pub versions: String,
}

/// One provider at one version, with its known hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPackage {
    pub source_addr: String,
    pub version: String,
    #[serde(default)]
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDependencyLockFileResponse {
    /// Absent when the diagnostics contain an error.
    pub dependency_locks_handle: Option<i64>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProviderPluginCacheRequest {
    pub cache_dir: PathBuf,
    pub dependency_locks_handle: i64,
    pub installation_methods: Vec<InstallMethod>,
    /// `os_arch`; the running platform when empty.
    #[serde(default)]
    pub override_platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMethod {
    pub source: InstallMethodSource,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl InstallMethod {
    pub fn new(source: InstallMethodSource) -> Self {
        Self {
            source,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallMethodSource {
    Direct,
    LocalMirrorDir { dir: PathBuf },
    NetworkMirrorUrl { url: String },
    /// A kind added by a newer client.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConstraints {
    pub source_addr: String,
    /// Canonical constraint string, empty for "any version".
    pub versions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub source_addr: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthResult {
    Unknown,
    OfficialSigned,
}

/// One step of a plugin cache build, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildProviderPluginCacheEvent {
    Pending {
        expected: Vec<ProviderConstraints>,
    },
    AlreadyInstalled {
        provider: ProviderVersion,
    },
    BuiltIn {
        source_addr: String,
    },
    BuiltInFailure {
        source_addr: String,
        diagnostic: Diagnostic,
    },
    QueryBegin {
        provider: ProviderConstraints,
    },
    QuerySuccess {
        provider: ProviderVersion,
    },
    QueryWarning {
        source_addr: String,
        warnings: Vec<String>,
    },
    QueryFailure {
        source_addr: String,
        diagnostic: Diagnostic,
    },
    FetchBegin {
        provider: ProviderVersion,
        location: String,
    },
    FetchSuccess {
        provider: ProviderVersion,
        auth_result: AuthResult,
        key_id_for_display: String,
    },
    FetchFailure {
        provider: ProviderVersion,
        diagnostic: Diagnostic,
    },
    /// A problem not tied to one provider.
    Diagnostic {
        diagnostic: Diagnostic,
    },
}

impl BuildProviderPluginCacheEvent {
    /// The diagnostic this event carries, if any.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::BuiltInFailure { diagnostic, .. }
            | Self::QueryFailure { diagnostic, .. }
            | Self::FetchFailure { diagnostic, .. }
            | Self::Diagnostic { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }

    /// Provider address this event is about, if any.
    pub fn source_addr(&self) -> Option<&str> {
        match self {
            Self::Pending { .. } | Self::Diagnostic { .. } => None,
            Self::BuiltIn { source_addr }
            | Self::BuiltInFailure { source_addr, .. }
            | Self::QueryWarning { source_addr, .. }
            | Self::QueryFailure { source_addr, .. } => Some(source_addr),
            Self::QueryBegin { provider } => Some(&provider.source_addr),
            Self::AlreadyInstalled { provider }
            | Self::QuerySuccess { provider }
            | Self::FetchBegin { provider, .. }
            | Self::FetchSuccess { provider, .. }
            | Self::FetchFailure { provider, .. } => Some(&provider.source_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_method_kinds() {
        let methods: Vec<InstallMethod> = serde_json::from_str(
            r#"[
                {"source": {"kind": "direct"}},
                {"source": {"kind": "local_mirror_dir", "dir": "/mirror"}, "include": ["hashicorp/aws"]},
                {"source": {"kind": "carrier_pigeon"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(methods[0].source, InstallMethodSource::Direct);
        assert_eq!(
            methods[1].source,
            InstallMethodSource::LocalMirrorDir {
                dir: PathBuf::from("/mirror")
            }
        );
        assert_eq!(methods[1].include, vec!["hashicorp/aws".to_string()]);
        assert_eq!(methods[2].source, InstallMethodSource::Unrecognized);
    }

    #[test]
    fn test_event_json_shape() {
        let ev = BuildProviderPluginCacheEvent::FetchSuccess {
            provider: ProviderVersion {
                source_addr: "hashicorp/null".into(),
                version: "3.2.1".into(),
            },
            auth_result: AuthResult::OfficialSigned,
            key_id_for_display: "34365D9472D7468F".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "fetch_success");
        assert_eq!(json["auth_result"], "official_signed");
        assert_eq!(ev.source_addr(), Some("hashicorp/null"));
        assert!(ev.diagnostic().is_none());
    }
}
