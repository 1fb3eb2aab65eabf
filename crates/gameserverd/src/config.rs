//! Startup configuration (spec §6): env > CLI > YAML file > defaults,
//! the same layering `dekaf`'s `Cli` and `agent`'s `Args` use `clap`'s
//! `env = "..."` fallbacks for, plus a nested YAML document for the cluster
//! topology that doesn't fit comfortably on a flag.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use gs_cluster::HostPorts;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    /// Path to the YAML cluster/persistence/monitoring config file.
    #[arg(long, env = "GAMESERVERD_CONFIG", default_value = "gameserverd.yaml")]
    pub config: PathBuf,

    /// This worker's GS id, confirmed against the expanded cluster map.
    /// Unset for the master process, which is identified by `--master-id`
    /// instead.
    #[arg(long, env = "GSID")]
    pub gsid: Option<String>,

    /// Run as the named master GS rather than resolving a worker id from
    /// `GSID`.
    #[arg(long)]
    pub master_id: Option<String>,

    /// Directory for the RocksDB-backed persistence driver.
    #[arg(long, env = "GAMESERVERD_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// HMAC secret used to mint and verify player session tokens.
    #[arg(long, env = "GAMESERVERD_AUTH_SECRET")]
    pub auth_secret: String,
}

/// `net.*` (spec §6).
#[derive(Debug, Deserialize)]
pub struct NetConfig {
    #[serde(rename = "gameServers")]
    pub game_servers: HashMap<String, HostPorts>,
    pub rpc: RpcConfig,
    #[serde(rename = "maxMsgSize", default = "default_max_msg_size")]
    pub max_msg_size: usize,
    #[serde(rename = "maxConnections", default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct RpcConfig {
    #[serde(rename = "basePort")]
    pub base_port: u16,
}

fn default_max_msg_size() -> usize {
    1 << 20
}

fn default_max_connections() -> usize {
    1000
}

/// `auth.*` (spec §6). Only the HMAC backend is implemented; `backEnd` is
/// read for forward compatibility with config files that name one
/// explicitly.
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "backEnd", default = "default_auth_backend")]
    pub back_end: String,
    #[serde(rename = "tokenLifespan", with = "humantime_serde", default = "default_token_lifespan")]
    pub token_lifespan: std::time::Duration,
}

fn default_auth_backend() -> String {
    "hmac".to_string()
}

fn default_token_lifespan() -> std::time::Duration {
    std::time::Duration::from_secs(3600)
}

/// `mon.statsd.*` (spec §6). Plumbed through to a local `metrics` recorder
/// at startup; see `DESIGN.md` for why the actual exporter is Prometheus
/// rather than a StatsD wire client.
#[derive(Debug, Deserialize, Default)]
pub struct MonConfig {
    pub statsd: StatsdConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct StatsdConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_statsd_host")]
    pub host: String,
    #[serde(default = "default_statsd_port")]
    pub port: u16,
    pub prefix: Option<String>,
}

fn default_statsd_host() -> String {
    "127.0.0.1".to_string()
}

fn default_statsd_port() -> u16 {
    9102
}

/// The whole YAML document.
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub net: NetConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub mon: MonConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path:?}")]
    Parse { path: PathBuf, #[source] source: serde_yaml::Error },
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> Result<FileConfig, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}
