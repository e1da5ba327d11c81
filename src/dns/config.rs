//! Configuration file handling
//!
//! The server is configured from a TOML file. Every key except the TSIG key
//! table has a default:
//!
//! ```toml
//! address = "0.0.0.0"
//! port = 5354
//! data_file = "zones.json"
//! state_file = "state.json"
//!
//! [tsig_keys.internal]
//! keyname = "xfr-internal."
//! secret = "c2VjcmV0LXNlY3JldC1zZWNyZXQ="
//! algorithm = "hmac-sha256"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use serde_derive::Deserialize;

#[derive(Debug, Display, From, Error)]
pub enum ConfigError {
    #[display(fmt = "failed to read configuration: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "failed to parse configuration: {}", _0)]
    Toml(toml::de::Error),
    #[display(fmt = "no tsig_keys configured")]
    #[from(ignore)]
    MissingTsigKeys,
    #[display(fmt = "{}: {}", field, message)]
    #[from(ignore)]
    InvalidValue { field: String, message: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Key definition for one view
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TsigKeyConfig {
    #[serde(default)]
    pub keyname: String,
    /// Base64 encoded shared secret
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_udp_threads")]
    pub udp_threads: usize,
    #[serde(default = "default_tcp_idle_timeout")]
    pub tcp_idle_timeout_secs: u64,
    /// Keys by view name
    #[serde(default)]
    pub tsig_keys: BTreeMap<String, TsigKeyConfig>,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5354
}

fn default_data_file() -> PathBuf {
    PathBuf::from("zones.json")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_udp_threads() -> usize {
    4
}

fn default_tcp_idle_timeout() -> u64 {
    10
}

fn default_algorithm() -> String {
    "hmac-sha256".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: default_address(),
            port: default_port(),
            data_file: default_data_file(),
            state_file: default_state_file(),
            udp_threads: default_udp_threads(),
            tcp_idle_timeout_secs: default_tcp_idle_timeout(),
            tsig_keys: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Config::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tsig_keys.is_empty() {
            return Err(ConfigError::MissingTsigKeys);
        }

        if self.udp_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "udp_threads".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.tcp_idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tcp_idle_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_toml(
            r#"
            [tsig_keys.internal]
            keyname = "xfr-internal"
            secret = "c2VjcmV0"
            "#,
        )
        .unwrap();

        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 5354);
        assert_eq!(config.udp_threads, 4);
        assert_eq!(config.tcp_idle_timeout_secs, 10);
        assert_eq!(config.listen_addr(), "0.0.0.0:5354");

        let key = &config.tsig_keys["internal"];
        assert_eq!(key.keyname, "xfr-internal");
        assert_eq!(key.algorithm, "hmac-sha256");
    }

    #[test]
    fn test_missing_keys_is_fatal() {
        assert!(matches!(
            Config::from_toml("port = 53"),
            Err(ConfigError::MissingTsigKeys)
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("port = \"not a number\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = Config {
            address: "::1".to_string(),
            port: 53,
            ..Config::default()
        };
        assert_eq!(config.listen_addr(), "[::1]:53");
    }
}
