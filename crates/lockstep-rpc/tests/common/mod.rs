//! Fixtures shared by the service integration tests.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use lockstep_core::bundle::MANIFEST_FILE;
use lockstep_core::discovery::{Credentials, ServiceDiscovery};
use lockstep_rpc::DependenciesService;
use lockstep_rpc::wire::BuildProviderPluginCacheEvent;
use reqwest::Client;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Address of the lock file inside [`bundle`].
pub const LOCK_ADDR: &str = "https://example.com/cfg.tar.gz//deps.lock.toml";

pub fn service() -> DependenciesService {
    let client = Client::new();
    DependenciesService::new(client.clone(), ServiceDiscovery::new(client, Credentials::new()))
}

/// A source bundle with a lock file at [`LOCK_ADDR`] and a registry package
/// `example.com/acme/net/aws` published as 1.0.0, 1.2.0 and 2.0.0.
pub fn bundle(lock_toml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("pkg-cfg")).unwrap();
    fs::write(dir.path().join("pkg-cfg/deps.lock.toml"), lock_toml).unwrap();
    fs::create_dir_all(dir.path().join("pkg-net")).unwrap();
    fs::write(dir.path().join("pkg-net/main.tf"), "# net").unwrap();

    let manifest = serde_json::json!({
        "packages": [
            { "source": "https://example.com/cfg.tar.gz", "local": "pkg-cfg" },
            { "source": "git::https://example.com/net.git", "local": "pkg-net" }
        ],
        "registry": [
            {
                "source": "example.com/acme/net/aws",
                "versions": {
                    "1.0.0": { "source": "git::https://example.com/net.git" },
                    "1.2.0": { "source": "git::https://example.com/net.git" },
                    "2.0.0": { "source": "git::https://example.com/net.git" }
                }
            }
        ]
    });
    fs::write(dir.path().join(MANIFEST_FILE), manifest.to_string()).unwrap();
    dir
}

/// An unpacked package in cache layout under `root`.
pub fn unpacked(root: &Path, provider_dir: &str, version: &str, platform: &str) {
    let dir = root.join(provider_dir).join(version).join(platform);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("terraform-provider"), format!("{provider_dir} {version}")).unwrap();
}

/// Zip archive bytes holding `files`.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let opts = zip::write::SimpleFileOptions::default();
        for (name, body) in files {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

pub fn event_channel() -> (
    mpsc::Sender<BuildProviderPluginCacheEvent>,
    mpsc::Receiver<BuildProviderPluginCacheEvent>,
) {
    mpsc::channel(64)
}

pub async fn drain(mut rx: mpsc::Receiver<BuildProviderPluginCacheEvent>) -> Vec<BuildProviderPluginCacheEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.recv().await {
        out.push(ev);
    }
    out
}

/// Events about one provider, in stream order.
pub fn for_provider<'a>(
    events: &'a [BuildProviderPluginCacheEvent],
    source_addr: &str,
) -> Vec<&'a BuildProviderPluginCacheEvent> {
    events
        .iter()
        .filter(|e| e.source_addr() == Some(source_addr))
        .collect()
}
