//! Configuration loading (§4.J): JSON file plus `SWGP_<FIELD>` environment overrides.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// The relay's configuration, deserialized from JSON and then overridden field-by-field
/// from the process environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub name: String,
    pub proxy_listen_addr: SocketAddr,
    pub proxy_mode: String,
    pub proxy_psk: String,
    #[serde(default)]
    pub proxy_fwmark: u32,
    pub upstream_endpoint: String,
    #[serde(default)]
    pub upstream_fwmark: u32,
    pub mtu: u16,
    #[serde(default)]
    pub disable_sendmmsg: bool,
}

/// Fatal failure to load or parse configuration, reported before the relay attempts to
/// start (§7, class 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment override {var} has an invalid value for its field: {reason}")]
    InvalidOverride { var: String, reason: String },
}

impl Config {
    /// Loads a [`Config`] from a JSON file at `path`, then applies any `SWGP_<FIELD>`
    /// environment overrides present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config: Config = serde_json::from_str(&text)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_var("SWGP_NAME") {
            self.name = v;
        }
        if let Some(v) = env_var("SWGP_PROXY_LISTEN_ADDR") {
            self.proxy_listen_addr = parse_override("SWGP_PROXY_LISTEN_ADDR", &v)?;
        }
        if let Some(v) = env_var("SWGP_PROXY_MODE") {
            self.proxy_mode = v;
        }
        if let Some(v) = env_var("SWGP_PROXY_PSK") {
            self.proxy_psk = v;
        }
        if let Some(v) = env_var("SWGP_PROXY_FWMARK") {
            self.proxy_fwmark = parse_override("SWGP_PROXY_FWMARK", &v)?;
        }
        if let Some(v) = env_var("SWGP_UPSTREAM_ENDPOINT") {
            self.upstream_endpoint = v;
        }
        if let Some(v) = env_var("SWGP_UPSTREAM_FWMARK") {
            self.upstream_fwmark = parse_override("SWGP_UPSTREAM_FWMARK", &v)?;
        }
        if let Some(v) = env_var("SWGP_MTU") {
            self.mtu = parse_override("SWGP_MTU", &v)?;
        }
        if let Some(v) = env_var("SWGP_DISABLE_SENDMMSG") {
            self.disable_sendmmsg = parse_override("SWGP_DISABLE_SENDMMSG", &v)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_override<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidOverride {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "name": "test",
            "proxy_listen_addr": "0.0.0.0:51821",
            "proxy_mode": "plain",
            "proxy_psk": "",
            "upstream_endpoint": "127.0.0.1:51820",
            "mtu": 1420
        }"#
    }

    #[test]
    fn defaults_apply_for_omitted_fields() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(config.proxy_fwmark, 0);
        assert_eq!(config.upstream_fwmark, 0);
        assert!(!config.disable_sendmmsg);
    }

    #[test]
    fn mtu_env_override_parses_into_field_type() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();

        std::env::set_var("SWGP_MTU", "1280");
        let result = config.apply_env_overrides();
        std::env::remove_var("SWGP_MTU");

        result.unwrap();
        assert_eq!(config.mtu, 1280);
    }

    #[test]
    fn malformed_env_override_is_a_config_error() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();

        std::env::set_var("SWGP_MTU", "not-a-number");
        let result = config.apply_env_overrides();
        std::env::remove_var("SWGP_MTU");

        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
    }
}
