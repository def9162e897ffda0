//! Installer lifecycle events.
//!
//! The installer is the producer; whoever holds the receiving end of the
//! channel decides how to present them. Events for one provider are sent in
//! lifecycle order. Events for different providers interleave freely, but
//! `PendingProviders` is always first.

use lockstep_schema::{Provider, Version, VersionConstraints};
use tokio::sync::mpsc;

use crate::auth::PackageAuthentication;
use crate::sources::PackageLocation;

/// Default capacity of the installer event channel.
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Every provider the call will process, with its nominal constraints.
    PendingProviders(Vec<(Provider, VersionConstraints)>),

    ProviderAlreadyInstalled {
        provider: Provider,
        version: Version,
    },

    BuiltInProviderAvailable {
        provider: Provider,
    },

    BuiltInProviderFailure {
        provider: Provider,
        error: String,
    },

    QueryPackagesBegin {
        provider: Provider,
        constraints: VersionConstraints,
        locked: bool,
    },

    /// Advisory messages from the source; installation continues.
    QueryPackagesWarning {
        provider: Provider,
        warnings: Vec<String>,
    },

    QueryPackagesSuccess {
        provider: Provider,
        version: Version,
    },

    QueryPackagesFailure {
        provider: Provider,
        error: String,
    },

    FetchPackageBegin {
        provider: Provider,
        version: Version,
        location: PackageLocation,
    },

    FetchPackageSuccess {
        provider: Provider,
        version: Version,
        location: PackageLocation,
        authentication: PackageAuthentication,
    },

    FetchPackageFailure {
        provider: Provider,
        version: Version,
        error: String,
    },
}

impl InstallEvent {
    /// The provider this event is about, if it is about exactly one.
    pub fn provider(&self) -> Option<&Provider> {
        match self {
            Self::PendingProviders(_) => None,
            Self::ProviderAlreadyInstalled { provider, .. }
            | Self::BuiltInProviderAvailable { provider }
            | Self::BuiltInProviderFailure { provider, .. }
            | Self::QueryPackagesBegin { provider, .. }
            | Self::QueryPackagesWarning { provider, .. }
            | Self::QueryPackagesSuccess { provider, .. }
            | Self::QueryPackagesFailure { provider, .. }
            | Self::FetchPackageBegin { provider, .. }
            | Self::FetchPackageSuccess { provider, .. }
            | Self::FetchPackageFailure { provider, .. } => Some(provider),
        }
    }

    /// Failure events carry a diagnostic of their own.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::BuiltInProviderFailure { .. }
                | Self::QueryPackagesFailure { .. }
                | Self::FetchPackageFailure { .. }
        )
    }
}

pub type EventSender = mpsc::Sender<InstallEvent>;
pub type EventReceiver = mpsc::Receiver<InstallEvent>;

/// A bounded installer event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_BUFFER)
}
