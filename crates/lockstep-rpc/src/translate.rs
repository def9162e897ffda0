//! Installer events to wire events.
//!
//! Each [`InstallEvent`] becomes exactly one wire event, forwarded in the
//! order received. Failures get their diagnostic here, and the translator
//! remembers whether it sent one so the service never reports the same
//! fault twice.

use lockstep_core::InstallEvent;
use lockstep_core::auth::PackageAuthentication;
use lockstep_core::events::EventReceiver;
use lockstep_schema::{Diagnostic, Provider, Version};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wire::{AuthResult, BuildProviderPluginCacheEvent, ProviderConstraints, ProviderVersion};

pub type EventSink = mpsc::Sender<BuildProviderPluginCacheEvent>;

fn provider_version(provider: &Provider, version: &Version) -> ProviderVersion {
    ProviderVersion {
        source_addr: provider.for_display(),
        version: version.to_string(),
    }
}

fn auth_result(auth: &PackageAuthentication) -> AuthResult {
    // Only the official signer is distinguished on the wire.
    if auth.is_official() {
        AuthResult::OfficialSigned
    } else {
        AuthResult::Unknown
    }
}

/// Map one installer event onto its wire form.
pub fn to_wire(event: InstallEvent) -> BuildProviderPluginCacheEvent {
    use BuildProviderPluginCacheEvent as Wire;

    match event {
        InstallEvent::PendingProviders(providers) => Wire::Pending {
            expected: providers
                .into_iter()
                .map(|(provider, constraints)| ProviderConstraints {
                    source_addr: provider.for_display(),
                    versions: constraints.to_string(),
                })
                .collect(),
        },
        InstallEvent::ProviderAlreadyInstalled { provider, version } => Wire::AlreadyInstalled {
            provider: provider_version(&provider, &version),
        },
        InstallEvent::BuiltInProviderAvailable { provider } => Wire::BuiltIn {
            source_addr: provider.for_display(),
        },
        InstallEvent::BuiltInProviderFailure { provider, error } => Wire::BuiltInFailure {
            source_addr: provider.for_display(),
            diagnostic: Diagnostic::error(
                "Built-in provider unavailable",
                format!(
                    "lockstep v{} does not support the provider {:?}: {error}.",
                    crate::VERSION,
                    provider.for_display()
                ),
            ),
        },
        InstallEvent::QueryPackagesBegin {
            provider,
            constraints,
            ..
        } => Wire::QueryBegin {
            provider: ProviderConstraints {
                source_addr: provider.for_display(),
                versions: constraints.to_string(),
            },
        },
        InstallEvent::QueryPackagesWarning { provider, warnings } => Wire::QueryWarning {
            source_addr: provider.for_display(),
            warnings,
        },
        InstallEvent::QueryPackagesSuccess { provider, version } => Wire::QuerySuccess {
            provider: provider_version(&provider, &version),
        },
        InstallEvent::QueryPackagesFailure { provider, error } => Wire::QueryFailure {
            source_addr: provider.for_display(),
            diagnostic: Diagnostic::error(
                "Provider is unavailable",
                format!(
                    "Failed to query for provider {}: {error}.",
                    provider.for_display()
                ),
            ),
        },
        InstallEvent::FetchPackageBegin {
            provider,
            version,
            location,
        } => Wire::FetchBegin {
            provider: provider_version(&provider, &version),
            location: location.to_string(),
        },
        InstallEvent::FetchPackageSuccess {
            provider,
            version,
            authentication,
            ..
        } => Wire::FetchSuccess {
            provider: provider_version(&provider, &version),
            auth_result: auth_result(&authentication),
            key_id_for_display: authentication.key_id().unwrap_or_default().to_string(),
        },
        InstallEvent::FetchPackageFailure {
            provider,
            version,
            error,
        } => Wire::FetchFailure {
            diagnostic: Diagnostic::error(
                "Failed to fetch provider package",
                format!(
                    "Failed to fetch provider {} v{version}: {error}.",
                    provider.for_display()
                ),
            ),
            provider: provider_version(&provider, &version),
        },
    }
}

/// Forwards installer events to a caller's sink.
#[derive(Debug)]
pub struct EventTranslator {
    sink: EventSink,
    sent_error_diagnostic: bool,
}

impl EventTranslator {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            sent_error_diagnostic: false,
        }
    }

    /// Whether any error diagnostic has gone out.
    pub fn sent_error_diagnostic(&self) -> bool {
        self.sent_error_diagnostic
    }

    /// Send one wire event. Returns `false` once the caller has gone away.
    pub async fn send(&mut self, event: BuildProviderPluginCacheEvent) -> bool {
        let is_error = event.diagnostic().is_some_and(Diagnostic::is_error);
        if self.sink.send(event).await.is_err() {
            return false;
        }
        self.sent_error_diagnostic |= is_error;
        true
    }

    /// Drain `events` until the installer drops its sender.
    ///
    /// Nothing is forwarded once `cancel` fires. If the caller disappears,
    /// `cancel` is fired and the remaining events are dropped unsent.
    pub async fn run(&mut self, mut events: EventReceiver, cancel: &CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("installation cancelled; dropping queued events");
                    return;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return;
            };
            if !self.send(to_wire(event)).await {
                debug!("event receiver closed; cancelling installation");
                cancel.cancel();
                return;
            }
        }
    }

    /// Report a failure no earlier diagnostic covered.
    pub async fn summarize_failure(&mut self, err: &impl std::fmt::Display) {
        if self.sent_error_diagnostic {
            return;
        }
        let diagnostic = Diagnostic::error(
            "Failed to install providers",
            format!("Cannot install the selected provider plugins: {err}."),
        );
        self.send(BuildProviderPluginCacheEvent::Diagnostic { diagnostic })
            .await;
    }
}
