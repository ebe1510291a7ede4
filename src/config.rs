//! Configuration management for the dashboard.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The result is read once at startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::AppError;
use crate::network_type::NetworkType;

/// Longest node name that still fits the header panel
pub const MAX_NODE_NAME_LEN: usize = 19;

/// Sentinel for "resolve the Shelley transition epoch from the network table"
pub const UNRESOLVED_TRANSITION_EPOCH: i64 = -1;

/// Default config location: `<config dir>/nodeview/nodeview.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nodeview")
        .join("nodeview.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub node: NodeConfig,
    pub prometheus: PrometheusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node_name: String,
    /// Takes precedence over `node.network` when non-empty
    pub network: String,
    /// Render tick in seconds
    pub refresh: u64,
    /// Consecutive polling failures tolerated before exiting
    pub retries: u32,
    pub log_buffer_size: usize,
    pub geoip: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_name: "Cardano Node".to_string(),
            network: String::new(),
            refresh: 1,
            retries: 3,
            log_buffer_size: 1000,
            geoip: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub binary: String,
    pub pid: Option<u32>,
    pub pid_file: Option<String>,
    pub network: String,
    pub network_magic: Option<u32>,
    pub port: u16,
    pub ekg_port: u16,
    pub shelley_trans_epoch: i64,
    pub block_producer: bool,
    pub byron: ByronOverrides,
    pub shelley: ShelleyOverrides,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary: "cardano-node".to_string(),
            pid: None,
            pid_file: None,
            network: "mainnet".to_string(),
            network_magic: None,
            port: 3001,
            ekg_port: 12788,
            shelley_trans_epoch: UNRESOLVED_TRANSITION_EPOCH,
            block_producer: false,
            byron: ByronOverrides::default(),
            shelley: ShelleyOverrides::default(),
        }
    }
}

/// Explicit Byron genesis values; each one set here wins over the network table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByronOverrides {
    pub start_time: Option<u64>,
    pub epoch_length: Option<u64>,
    pub k: Option<u64>,
    pub slot_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelleyOverrides {
    pub epoch_length: Option<u64>,
    pub slot_length: Option<u64>,
    pub slots_per_kes_period: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub host: String,
    pub port: u16,
    /// Poll interval in seconds
    pub refresh: u64,
    /// HTTP timeout in seconds
    pub timeout: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12798,
            refresh: 3,
            timeout: 3,
        }
    }
}

impl PrometheusConfig {
    pub fn metrics_url(&self) -> String {
        format!("http://{}:{}/metrics", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
    /// Log file; when unset logs only reach the in-dashboard buffer
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load defaults, then `path` (if any), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let fallback = default_config_path();
                if fallback.exists() {
                    Self::load_from_file(&fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("error reading config file {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), AppError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` so tests never touch the real environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NODE_NAME") {
            self.app.node_name = v;
        }
        if let Some(v) = get("NETWORK") {
            self.app.network = v;
        }
        if let Some(v) = get("REFRESH") {
            self.app.refresh = parse_env("REFRESH", &v)?;
        }
        if let Some(v) = get("RETRIES") {
            self.app.retries = parse_env("RETRIES", &v)?;
        }
        if let Some(v) = get("LOG_BUFFER_SIZE") {
            self.app.log_buffer_size = parse_env("LOG_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = get("GEOIP") {
            self.app.geoip = parse_env("GEOIP", &v)?;
        }

        if let Some(v) = get("CARDANO_NODE_BINARY") {
            self.node.binary = v;
        }
        if let Some(v) = get("CARDANO_NODE_PID") {
            self.node.pid = Some(parse_env("CARDANO_NODE_PID", &v)?);
        }
        if let Some(v) = get("CARDANO_NODE_PID_FILE") {
            self.node.pid_file = Some(v);
        }
        if let Some(v) = get("CARDANO_NETWORK") {
            self.node.network = v;
        }
        if let Some(v) = get("CARDANO_NODE_NETWORK_MAGIC") {
            self.node.network_magic = Some(parse_env("CARDANO_NODE_NETWORK_MAGIC", &v)?);
        }
        if let Some(v) = get("CARDANO_PORT") {
            self.node.port = parse_env("CARDANO_PORT", &v)?;
        }
        if let Some(v) = get("CARDANO_EKG_PORT") {
            self.node.ekg_port = parse_env("CARDANO_EKG_PORT", &v)?;
        }
        if let Some(v) = get("SHELLEY_TRANS_EPOCH") {
            self.node.shelley_trans_epoch = parse_env("SHELLEY_TRANS_EPOCH", &v)?;
        }
        if let Some(v) = get("CARDANO_BLOCK_PRODUCER") {
            self.node.block_producer = parse_env("CARDANO_BLOCK_PRODUCER", &v)?;
        }

        if let Some(v) = get("BYRON_GENESIS_START_SEC") {
            self.node.byron.start_time = Some(parse_env("BYRON_GENESIS_START_SEC", &v)?);
        }
        if let Some(v) = get("BYRON_EPOCH_LENGTH") {
            self.node.byron.epoch_length = Some(parse_env("BYRON_EPOCH_LENGTH", &v)?);
        }
        if let Some(v) = get("BYRON_K") {
            self.node.byron.k = Some(parse_env("BYRON_K", &v)?);
        }
        if let Some(v) = get("BYRON_SLOT_LENGTH") {
            self.node.byron.slot_length = Some(parse_env("BYRON_SLOT_LENGTH", &v)?);
        }
        if let Some(v) = get("SHELLEY_EPOCH_LENGTH") {
            self.node.shelley.epoch_length = Some(parse_env("SHELLEY_EPOCH_LENGTH", &v)?);
        }
        if let Some(v) = get("SHELLEY_SLOT_LENGTH") {
            self.node.shelley.slot_length = Some(parse_env("SHELLEY_SLOT_LENGTH", &v)?);
        }
        if let Some(v) = get("SHELLEY_SLOTS_PER_KES_PERIOD") {
            self.node.shelley.slots_per_kes_period =
                Some(parse_env("SHELLEY_SLOTS_PER_KES_PERIOD", &v)?);
        }

        if let Some(v) = get("PROM_HOST") {
            self.prometheus.host = v;
        }
        if let Some(v) = get("PROM_PORT") {
            self.prometheus.port = parse_env("PROM_PORT", &v)?;
        }
        if let Some(v) = get("PROM_REFRESH") {
            self.prometheus.refresh = parse_env("PROM_REFRESH", &v)?;
        }
        if let Some(v) = get("PROM_TIMEOUT") {
            self.prometheus.timeout = parse_env("PROM_TIMEOUT", &v)?;
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.app.node_name.chars().count() > MAX_NODE_NAME_LEN {
            return Err(AppError::Config(format!(
                "please keep node name at or below {} characters in length",
                MAX_NODE_NAME_LEN
            )));
        }
        if self.app.refresh == 0 || self.prometheus.refresh == 0 {
            return Err(AppError::Config("refresh intervals must be > 0".into()));
        }
        if self.prometheus.timeout == 0 {
            return Err(AppError::Config("prometheus timeout must be > 0".into()));
        }
        if self.node.shelley_trans_epoch < UNRESOLVED_TRANSITION_EPOCH {
            return Err(AppError::Config(format!(
                "invalid shelley transition epoch {}",
                self.node.shelley_trans_epoch
            )));
        }
        Ok(())
    }

    /// Network name used for genesis lookup: app setting, then node setting, then mainnet
    pub fn network_name(&self) -> &str {
        if !self.app.network.trim().is_empty() {
            &self.app.network
        } else if !self.node.network.trim().is_empty() {
            &self.node.network
        } else {
            NetworkType::Mainnet.as_str()
        }
    }

    pub fn network_type(&self) -> Result<NetworkType, AppError> {
        self.network_name().parse()
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid value for {}: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.app.node_name, "Cardano Node");
        assert_eq!(config.app.retries, 3);
        assert_eq!(config.node.binary, "cardano-node");
        assert_eq!(config.node.port, 3001);
        assert_eq!(config.node.shelley_trans_epoch, UNRESOLVED_TRANSITION_EPOCH);
        assert_eq!(config.prometheus.metrics_url(), "http://127.0.0.1:12798/metrics");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodeview.toml");
        fs::write(
            &path,
            r#"
[app]
node_name = "relay-1"

[node]
network = "preprod"
port = 6000

[node.byron]
k = 432
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.app.node_name, "relay-1");
        assert_eq!(config.app.retries, 3);
        assert_eq!(config.node.network, "preprod");
        assert_eq!(config.node.port, 6000);
        assert_eq!(config.node.byron.k, Some(432));
        assert_eq!(config.node.byron.start_time, None);
        assert_eq!(config.prometheus.port, 12798);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("nodeview.toml");
        let mut config = Config::default();
        config.node.block_producer = true;
        config.node.shelley.epoch_length = Some(86_400);
        config.save_to_file(&path).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap();
        assert!(reloaded.node.block_producer);
        assert_eq!(reloaded.node.shelley.epoch_length, Some(86_400));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from_file(Path::new("/nonexistent/nodeview.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let vars = env(&[
            ("NETWORK", "preview"),
            ("CARDANO_PORT", "3002"),
            ("SHELLEY_TRANS_EPOCH", "0"),
            ("BYRON_K", "432"),
            ("PROM_TIMEOUT", "5"),
            ("CARDANO_BLOCK_PRODUCER", "true"),
            ("RETRIES", ""),
        ]);
        let mut config = Config::default();
        config
            .apply_env_overrides(|key| vars.get(key).cloned())
            .unwrap();

        assert_eq!(config.app.network, "preview");
        assert_eq!(config.node.port, 3002);
        assert_eq!(config.node.shelley_trans_epoch, 0);
        assert_eq!(config.node.byron.k, Some(432));
        assert_eq!(config.prometheus.timeout, 5);
        assert!(config.node.block_producer);
        // empty values are ignored
        assert_eq!(config.app.retries, 3);
    }

    #[test]
    fn test_malformed_env_value_is_rejected() {
        let vars = env(&[("CARDANO_PORT", "not-a-port")]);
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|key| vars.get(key).cloned())
            .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("CARDANO_PORT")));
    }

    #[test]
    fn test_node_name_length_limit() {
        let mut config = Config::default();
        config.app.node_name = "a-very-long-node-name-indeed".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_name_precedence() {
        let mut config = Config::default();
        assert_eq!(config.network_name(), "mainnet");

        config.node.network = "preprod".to_string();
        assert_eq!(config.network_name(), "preprod");

        config.app.network = "preview".to_string();
        assert_eq!(config.network_type().unwrap(), NetworkType::Preview);

        config.app.network.clear();
        config.node.network.clear();
        assert_eq!(config.network_type().unwrap(), NetworkType::Mainnet);

        config.app.network = "unknown".to_string();
        assert!(matches!(
            config.network_type(),
            Err(AppError::UnknownNetwork(_))
        ));
    }
}
