//! Environment-variable configuration for the CLI launcher (spec §6, plus
//! the peer-connection variables the ambient stack adds in SPEC_FULL.md).
//!
//! Grounded on the teacher's `config` crate usage in `ilp-node`: a layered
//! `config::Config` merging an optional `--config` file under environment
//! variables, deserialized in one shot via `serde`.

use std::time::Duration;

use ilp_edge_btp::FulfillmentScheme;
use serde::Deserialize;

fn default_business_logic_timeout_ms() -> u64 {
    5_000
}
fn default_session_ttl_ms() -> u64 {
    60_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_node_id() -> String {
    "ilp-edge-node".to_string()
}
fn default_auth_timeout_ms() -> u64 {
    5_000
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_pong_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_base_ms() -> u64 {
    100
}
fn default_reconnect_cap_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    10
}
fn default_fulfillment_scheme() -> String {
    "sha256".to_string()
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub port: u16,
    pub base_address: String,
    pub business_logic_url: String,
    #[serde(default = "default_business_logic_timeout_ms")]
    pub business_logic_timeout: u64,
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_node_id")]
    pub node_id: String,

    pub peer_btp_url: String,
    pub peer_id: String,
    pub peer_secret: String,
    #[serde(default = "default_auth_timeout_ms")]
    pub peer_auth_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub peer_ping_interval_ms: u64,
    #[serde(default = "default_pong_timeout_ms")]
    pub peer_pong_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub peer_reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub peer_reconnect_cap_ms: u64,
    #[serde(default = "default_max_retries")]
    pub peer_max_retries: u32,
    #[serde(default = "default_fulfillment_scheme")]
    pub fulfillment_scheme: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),
    #[error("invalid URL in configuration: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid ILP address in configuration: {0}")]
    Address(#[from] ilp_edge_packet::AddressError),
    #[error("unrecognized FULFILLMENT_SCHEME value: '{0}' (expected 'sha256' or 'hmac-sha256')")]
    UnknownFulfillmentScheme(String),
}

impl NodeConfig {
    /// Loads from an optional config file (lowest priority) overlaid with
    /// environment variables (highest priority), the way the teacher's
    /// `ilp-node` layers `config::File` under `config::Environment`.
    pub fn load(config_path: Option<&str>) -> Result<NodeConfig, ConfigError> {
        let mut settings = config::Config::default();
        if let Some(path) = config_path {
            settings.merge(config::File::with_name(path))?;
        }
        settings.merge(config::Environment::new())?;
        Ok(settings.try_into()?)
    }

    pub fn business_logic_url(&self) -> Result<url::Url, ConfigError> {
        Ok(url::Url::parse(&self.business_logic_url)?)
    }

    pub fn peer_btp_url(&self) -> Result<url::Url, ConfigError> {
        Ok(url::Url::parse(&self.peer_btp_url)?)
    }

    pub fn base_address(&self) -> Result<ilp_edge_packet::Address, ConfigError> {
        use std::str::FromStr;
        Ok(ilp_edge_packet::Address::from_str(&self.base_address)?)
    }

    pub fn fulfillment_scheme(&self) -> Result<FulfillmentScheme, ConfigError> {
        match self.fulfillment_scheme.as_str() {
            "sha256" => Ok(FulfillmentScheme::Sha256),
            "hmac-sha256" => Ok(FulfillmentScheme::HmacSha256),
            other => Err(ConfigError::UnknownFulfillmentScheme(other.to_string())),
        }
    }

    pub fn business_logic_timeout(&self) -> Duration {
        Duration::from_millis(self.business_logic_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // config::Environment reads process-wide state; serialize these tests
    // so they don't stomp on each other's env vars.
    lazy_static::lazy_static! {
        static ref ENV_LOCK: Mutex<()> = Mutex::new(());
    }

    fn set_required_env() {
        std::env::set_var("PORT", "7770");
        std::env::set_var("BASE_ADDRESS", "g.edge-node");
        std::env::set_var("BUSINESS_LOGIC_URL", "http://localhost:9000");
        std::env::set_var("PEER_BTP_URL", "ws://localhost:8000");
        std::env::set_var("PEER_ID", "peer1");
        std::env::set_var("PEER_SECRET", "shared-secret");
    }

    #[test]
    fn loads_required_fields_and_applies_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        std::env::remove_var("LOG_LEVEL");
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.port, 7770);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.peer_max_retries, 10);
    }

    #[test]
    fn rejects_unknown_fulfillment_scheme() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        std::env::set_var("FULFILLMENT_SCHEME", "rot13");
        let config = NodeConfig::load(None).unwrap();
        assert!(matches!(
            config.fulfillment_scheme(),
            Err(ConfigError::UnknownFulfillmentScheme(_))
        ));
        std::env::remove_var("FULFILLMENT_SCHEME");
    }
}
