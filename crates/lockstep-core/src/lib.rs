pub mod auth;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod events;
pub mod handles;
pub mod hashing;
pub mod installer;
pub mod io;
pub mod lockfile;
pub mod resolver;
pub mod sourceaddrs;
pub mod sources;

pub use cache::{CacheLocks, CachedPackage, ProviderCache};
pub use config::Config;
pub use events::InstallEvent;
pub use handles::{Handle, HandleTable, InvalidHandle};
pub use installer::{Installer, InstallerError};
pub use lockfile::{LockSet, ProviderLock, load_locks_from_file};

/// User Agent string for registry and mirror requests
pub const USER_AGENT: &str = concat!("lockstep/", env!("CARGO_PKG_VERSION"));
