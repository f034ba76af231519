use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ProbeError, Result};

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_collect_interval")]
    pub collect_interval: u64,
    pub exporter: Exporter,
    #[serde(default)]
    pub collectors: Collectors,
}

#[derive(Deserialize, Debug)]
pub struct Collectors {
    #[serde(default = "default_true")]
    pub kernel: bool,
    #[serde(default = "default_true")]
    pub processes: bool,
    #[serde(default)]
    pub logins: LoginCollectorConfig,
    #[serde(default)]
    pub network: NetworkCollectorConfig,
}

impl Default for Collectors {
    fn default() -> Self {
        Collectors {
            kernel: true,
            processes: true,
            logins: LoginCollectorConfig::default(),
            network: NetworkCollectorConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoginCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_wtmp_path")]
    pub path: PathBuf,
    /// Logins older than this many seconds are not reported.
    #[serde(default = "default_login_window")]
    pub window_secs: u64,
}

impl Default for LoginCollectorConfig {
    fn default() -> Self {
        LoginCollectorConfig {
            enabled: true,
            path: default_wtmp_path(),
            window_secs: default_login_window(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct NetworkCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only interfaces whose name starts with one of these are reported.
    #[serde(default = "default_interface_prefixes")]
    pub interface_prefixes: Vec<String>,
}

impl Default for NetworkCollectorConfig {
    fn default() -> Self {
        NetworkCollectorConfig {
            enabled: true,
            interface_prefixes: default_interface_prefixes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_wtmp_path() -> PathBuf {
    PathBuf::from("/var/log/wtmp")
}

/// Longest accepted login window: 100 years.
pub const MAX_LOGIN_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn default_login_window() -> u64 {
    300
}

fn default_interface_prefixes() -> Vec<String> {
    ["eth", "em", "en", "bond", "wl"].iter().map(|p| p.to_string()).collect()
}

#[derive(Deserialize, Debug)]
pub enum Exporter {
    #[serde(rename = "influxdb")]
    InfluxDB(InfluxDBConfig),
}

#[derive(Deserialize, Debug)]
pub struct InfluxDBConfig {
    pub url: String,
    // V2 fields
    pub bucket: Option<String>,
    pub org: Option<String>,
    pub token: Option<String>,
    // V1 fields
    pub db: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_collect_interval() -> u64 {
    15
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ProbeError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| ProbeError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let config: Config = toml::from_str(content).map_err(|e| e.to_string())?;
        if config.collect_interval == 0 {
            return Err("collect_interval must be at least 1 second".to_string());
        }
        if config.collectors.logins.window_secs > MAX_LOGIN_WINDOW_SECS {
            return Err(format!(
                "collectors.logins.window_secs must be at most {MAX_LOGIN_WINDOW_SECS}"
            ));
        }
        Ok(config)
    }
}
