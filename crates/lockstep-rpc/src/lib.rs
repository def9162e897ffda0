//! lockstep - provider dependency service
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves, caches and installs the provider packages a configuration has
//! locked, behind a handle-based service surface.
//!
//! # Architecture
//!
//! - **Handles**: remote callers hold `i64` handles into a typed table, never
//!   references to the bundles, lock sets and caches themselves.
//! - **Streaming installs**: the installer sends lifecycle events over a
//!   channel; [`translate::EventTranslator`] turns them into wire events.
//! - **Best effort**: once a cache build starts, failures are diagnostics in
//!   the event stream rather than call errors.

pub mod cmd;
pub mod error;
pub mod service;
pub mod translate;
pub mod wire;

pub use error::ServiceError;
pub use service::DependenciesService;
pub use translate::EventTranslator;

/// Version reported by the binary, derived from git tags at build time.
pub const VERSION: &str = env!("LOCKSTEP_VERSION");

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lockstep")]
#[command(author, version = VERSION, about = "lockstep - provider dependency service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the providers selected by a lock file inside a source bundle
    Locks {
        /// Source bundle directory
        #[arg(long, env = "LOCKSTEP_BUNDLE")]
        bundle: PathBuf,
        /// Source address of the lock file within the bundle
        address: String,
        /// Version constraints, for registry addresses
        #[arg(long, default_value = "")]
        versions: String,
    },
    /// List the packages in a provider plugin cache
    Cache {
        /// Cache directory (defaults to the configured plugin cache)
        dir: Option<PathBuf>,
        /// Platform to list, as os_arch
        #[arg(long, default_value = "")]
        platform: String,
    },
    /// Resolve a source address against a bundle
    Resolve {
        /// Source bundle directory
        #[arg(long, env = "LOCKSTEP_BUNDLE")]
        bundle: PathBuf,
        /// Source address to resolve
        address: String,
        /// Version constraints, for registry addresses
        #[arg(long, default_value = "")]
        versions: String,
    },
    /// Install every locked provider into a plugin cache
    Install {
        /// Source bundle directory
        #[arg(long, env = "LOCKSTEP_BUNDLE")]
        bundle: PathBuf,
        /// Source address of the lock file within the bundle
        lock_file: String,
        /// Cache directory (defaults to the configured plugin cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Local mirror directory, consulted in the order given
        #[arg(long = "local-mirror")]
        local_mirrors: Vec<PathBuf>,
        /// Network mirror base URL, consulted after local mirrors
        #[arg(long = "network-mirror")]
        network_mirrors: Vec<String>,
        /// Also query origin registries, after any mirrors
        #[arg(long)]
        direct: bool,
        /// Target platform, as os_arch
        #[arg(long, default_value = "")]
        platform: String,
    },
}
