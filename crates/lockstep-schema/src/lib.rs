//! Shared types for lockstep.
//!
//! Everything in this crate is plain data with parsing and formatting rules:
//! provider addresses, versions and constraint sets, target platforms,
//! package hashes and diagnostics. The crate does no I/O.

/// Provider source addresses.
pub mod addrs;
/// User-facing diagnostics.
pub mod diagnostics;
/// Package hashes in their `scheme:value` form.
pub mod hash;
/// Target `os_arch` platforms.
pub mod platform;
/// Versions and version constraint sets.
pub mod version;

// Re-exports
pub use addrs::*;
pub use diagnostics::*;
pub use hash::*;
pub use platform::*;
pub use version::*;

/// Hostname of the public provider registry, used when an address omits it.
pub const DEFAULT_REGISTRY_HOST: &str = "registry.terraform.io";

/// Hostname reserved for providers compiled into the host program.
pub const BUILTIN_PROVIDER_HOST: &str = "terraform.io";

/// Namespace reserved for providers compiled into the host program.
pub const BUILTIN_PROVIDER_NAMESPACE: &str = "builtin";
