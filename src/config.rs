//! Configuration loading: a TOML file resolved via `Config::load`, with certificate paths made
//! relative to the config file's own directory.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::defaults;
use crate::session::{NodeIdentity, SessionConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Config {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub ca_certificate: PathBuf,
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    pub username: String,
    pub password: String,
    pub version: f64,
    pub rev: i64,
    pub node_type: String,
    pub instance: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(with = "humantime_serde", default = "defaults::ping_interval")]
    pub ping_interval: Duration,
}

fn default_port() -> u16 {
    6666
}

impl Config {
    pub async fn load(config_path: impl AsRef<Path>) -> Result<Config, anyhow::Error> {
        let mut config: Config = toml::from_str(
            &tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("failed to read {}", config_path.as_ref().display()))?,
        )
        .context("failed to parse configuration")?;

        let config_dir = config_path
            .as_ref()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        config.ca_certificate = config_dir.join(&config.ca_certificate);
        config.client_certificate = config.client_certificate.map(|p| config_dir.join(p));
        config.client_key = config.client_key.map(|p| config_dir.join(p));

        Ok(config)
    }

    /// Build the immutable `SessionConfig` this configuration describes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            port: self.port,
            ca_certificate_path: self.ca_certificate.clone(),
            client_identity: match (&self.client_certificate, &self.client_key) {
                (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
                _ => None,
            },
            username: self.username.clone(),
            password: self.password.clone(),
            identity: NodeIdentity {
                version: self.version,
                rev: self.rev,
                node_type: self.node_type.clone(),
                instance: self.instance.clone(),
                description: self.description.clone(),
                persistent: self.persistent as u8,
            },
            handshake_timeout: defaults::response_timeout(),
            response_timeout: defaults::response_timeout(),
            idle_recv_timeout: defaults::idle_recv_timeout(),
        }
    }
}
