use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub cluster: ClusterConfig,
    pub ssh: SshConfig,
    pub rollout: RolloutConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("rollout").join("config.yaml"))
    }
}

/// Layer defaults, the YAML file (custom path or default), and `ROLLOUT_*`
/// environment variables, in that order.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::path()?,
    };

    Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("ROLLOUT_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub http_addr: String,
    pub log_level: String,
    pub state_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("/var/lib"));
        Self {
            http_addr: "0.0.0.0:9200".to_string(),
            log_level: "info".to_string(),
            state_file: data_dir.join("rollout").join("update-state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub kubectl: String,
    pub kubeconfig: Option<String>,
    pub drain_timeout_secs: u64,
    pub ready_poll_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            drain_timeout_secs: 300,
            ready_poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: Option<String>,
    pub connect_timeout_secs: u64,
    /// Node name that refers to this host. Defaults to the system host name.
    pub local_node: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            connect_timeout_secs: 10,
            local_node: None,
        }
    }
}

impl SshConfig {
    pub fn local_node(&self) -> String {
        self.local_node.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub log_capacity: usize,
    pub output_tail_chars: usize,
    pub upgrade_timeout_secs: u64,
    pub check_timeout_secs: u64,
    pub wait_ready_timeout_secs: u64,
    pub api_ready_timeout_secs: u64,
    pub server_restart_grace_secs: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            log_capacity: 500,
            output_tail_chars: 500,
            upgrade_timeout_secs: 300,
            check_timeout_secs: 120,
            wait_ready_timeout_secs: 120,
            api_ready_timeout_secs: 180,
            server_restart_grace_secs: 10,
        }
    }
}

impl RolloutConfig {
    pub fn upgrade_timeout(&self) -> Duration {
        Duration::from_secs(self.upgrade_timeout_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn wait_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_ready_timeout_secs)
    }

    pub fn api_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.api_ready_timeout_secs)
    }

    pub fn server_restart_grace(&self) -> Duration {
        Duration::from_secs(self.server_restart_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub release_channel_url: String,
    pub channel: String,
    pub install_script_url: String,
    pub binary_base_url: String,
    pub agent_service: String,
    pub binary_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            release_channel_url: "https://update.k3s.io/v1-release/channels".to_string(),
            channel: "stable".to_string(),
            install_script_url: "https://get.k3s.io".to_string(),
            binary_base_url: "https://github.com/k3s-io/k3s/releases/download".to_string(),
            agent_service: "k3s-agent".to_string(),
            binary_path: "/usr/local/bin/k3s".to_string(),
        }
    }
}
