//! Sets `LOCKSTEP_VERSION` for the `lockstep` binary.
//!
//! Release builds are tagged `vX.Y.Z`; untagged checkouts and source
//! tarballs fall back to the package version.

use std::process::Command;

const GIT_DIR: &str = "../../.git";

fn main() {
    println!("cargo:rerun-if-changed={GIT_DIR}/HEAD");
    println!("cargo:rerun-if-changed={GIT_DIR}/refs/tags");

    let version = release_tag().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=LOCKSTEP_VERSION={version}");
}

/// The nearest `v*` tag, with a `-dev` suffix on a dirty tree.
fn release_tag() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--tags", "--match", "v[0-9]*", "--dirty=-dev"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let described = String::from_utf8(out.stdout).ok()?;
    let version = described.trim().strip_prefix('v')?;
    (!version.is_empty()).then(|| version.to_string())
}
