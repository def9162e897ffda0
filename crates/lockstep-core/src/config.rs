//! Service configuration.
//!
//! Everything lives under a home directory, `$LOCKSTEP_HOME` or
//! `~/.lockstep`. An optional `config.toml` there may set:
//!
//! ```toml
//! plugin_cache_dir = "/var/cache/lockstep/providers"
//!
//! [credentials]
//! "app.terraform.io" = "token"
//!
//! [hosts]
//! "registry.example.com" = "http://127.0.0.1:8080/"
//! ```
//!
//! Environment variables take precedence over the file:
//!
//! - `LOCKSTEP_TOKEN_<host>`: bearer token for `<host>`
//! - `LOCKSTEP_HOST_OVERRIDE_<host>`: discovery root for `<host>`
//!
//! In `<host>`, `__` stands for `-` and `_` for `.`, so
//! `LOCKSTEP_TOKEN_app_terraform_io` names `app.terraform.io`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::discovery::{Credentials, ServiceDiscovery};

pub const HOME_VAR: &str = "LOCKSTEP_HOME";
const TOKEN_PREFIX: &str = "LOCKSTEP_TOKEN_";
const HOST_OVERRIDE_PREFIX: &str = "LOCKSTEP_HOST_OVERRIDE_";
const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory; set {HOME_VAR}")]
    NoHome,

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid override URL for host {host}: {reason}")]
    HostOverride { host: String, reason: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    plugin_cache_dir: Option<PathBuf>,
    #[serde(default)]
    credentials: BTreeMap<String, String>,
    #[serde(default)]
    hosts: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    /// Default provider cache for the CLI.
    pub cache_dir: PathBuf,
    pub credentials: Credentials,
    pub host_overrides: BTreeMap<String, Url>,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let home = match std::env::var_os(HOME_VAR) {
            Some(val) => PathBuf::from(val),
            None => dirs::home_dir()
                .map(|h| h.join(".lockstep"))
                .ok_or(ConfigError::NoHome)?,
        };
        Self::from_vars(std::env::vars(), home)
    }

    /// Load with an explicit home directory and environment.
    pub fn from_vars<I>(vars: I, home: PathBuf) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let file = read_config_file(&home.join(CONFIG_FILE))?;

        let cache_dir = match file.plugin_cache_dir {
            Some(dir) if dir.is_relative() => home.join(dir),
            Some(dir) => dir,
            None => home.join("plugin-cache"),
        };

        let mut credentials = Credentials::new();
        for (host, token) in file.credentials {
            credentials.insert(host, token);
        }
        let mut raw_overrides = file.hosts;

        for (key, value) in vars {
            if let Some(host) = key.strip_prefix(HOST_OVERRIDE_PREFIX) {
                raw_overrides.insert(decode_host(host), value);
            } else if let Some(host) = key.strip_prefix(TOKEN_PREFIX) {
                credentials.insert(decode_host(host), value);
            }
        }

        let mut host_overrides = BTreeMap::new();
        for (host, raw) in raw_overrides {
            let url = Url::parse(&raw).map_err(|e| ConfigError::HostOverride {
                host: host.clone(),
                reason: e.to_string(),
            })?;
            host_overrides.insert(host.to_lowercase(), url);
        }

        debug!(
            home = %home.display(),
            credentials = credentials.len(),
            overrides = host_overrides.len(),
            "loaded configuration"
        );
        Ok(Self {
            home,
            cache_dir,
            credentials,
            host_overrides,
        })
    }

    /// Service discovery with this configuration's credentials and overrides.
    pub fn discovery(&self, client: Client) -> ServiceDiscovery {
        self.host_overrides.iter().fold(
            ServiceDiscovery::new(client, self.credentials.clone()),
            |discovery, (host, root)| discovery.with_host_override(host.clone(), root.clone()),
        )
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&src).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `app_terraform_io` -> `app.terraform.io`, `my__host_com` -> `my-host.com`
fn decode_host(encoded: &str) -> String {
    encoded.replace("__", "\0").replace('_', ".").replace('\0', "-").to_lowercase()
}
