use crate::error::{EscrowError, Result};
use crate::model::{AccountId, MAX_PROTOCOL_FEE_BPS};
use crate::Bps;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL advertised in payment challenges.
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ProtocolConfig {
    /// Deployment identity bound into the signing domain.
    pub instance: String,
    /// Token symbol advertised in payment challenges.
    pub token_symbol: String,
    /// Chain id advertised in payment challenges (0 for off-chain ledgers).
    pub chain_id: u64,
    /// Settlement fee in basis points; capped at [`MAX_PROTOCOL_FEE_BPS`].
    pub protocol_fee_bps: Bps,
    /// Seconds a seller has to prove delivery after a payment opens.
    pub delivery_deadline_secs: u64,
    /// Withdrawal lock applied (and re-applied) on every bond deposit.
    pub bond_lock_secs: u64,
    /// Maximum age/skew tolerated on a delivery commitment's timestamp.
    pub max_commitment_age_secs: u64,
    /// Privileged account for minting and slashing.
    pub operator: Option<AccountId>,
    /// Single trusted party deciding disputes.
    pub arbitrator: Option<AccountId>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8402,
            public_url: None,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            instance: "dev".to_string(),
            token_symbol: "USDM".to_string(),
            chain_id: 0,
            protocol_fee_bps: 100,
            delivery_deadline_secs: 3_600,
            bond_lock_secs: 604_800,
            max_commitment_age_secs: 600,
            operator: None,
            arbitrator: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| EscrowError::Config(format!("failed to read config file: {e}")))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| EscrowError::Config(format!("failed to parse config file: {e}")))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(operator) = std::env::var("METERPAY_OPERATOR") {
            self.protocol.operator = Some(operator.parse()?);
        }
        if let Ok(arbitrator) = std::env::var("METERPAY_ARBITRATOR") {
            self.protocol.arbitrator = Some(arbitrator.parse()?);
        }
        if let Ok(instance) = std::env::var("METERPAY_INSTANCE") {
            self.protocol.instance = instance;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(EscrowError::Config("server port cannot be 0".to_string()));
        }
        if self.protocol.instance.is_empty() {
            return Err(EscrowError::Config(
                "protocol instance cannot be empty".to_string(),
            ));
        }
        if self.protocol.protocol_fee_bps > MAX_PROTOCOL_FEE_BPS {
            return Err(EscrowError::Config(format!(
                "protocol fee {} bps exceeds the {} bps cap",
                self.protocol.protocol_fee_bps, MAX_PROTOCOL_FEE_BPS
            )));
        }
        if self.protocol.delivery_deadline_secs == 0 {
            return Err(EscrowError::Config(
                "delivery deadline cannot be 0".to_string(),
            ));
        }
        if self.protocol.bond_lock_secs == 0 {
            return Err(EscrowError::Config("bond lock cannot be 0".to_string()));
        }
        if self.logging.level.is_empty() {
            return Err(EscrowError::Config("log level cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn public_url(&self) -> String {
        self.server
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.server_address()))
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| EscrowError::Config(format!("failed to serialize default config: {e}")))?;

    std::fs::write(path, toml_str)
        .map_err(|e| EscrowError::Config(format!("failed to write default config file: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8402);
        assert_eq!(config.protocol.protocol_fee_bps, 100);
    }

    #[test]
    fn fee_cap_is_enforced() {
        let mut config = AppConfig::default();
        config.protocol.protocol_fee_bps = MAX_PROTOCOL_FEE_BPS;
        assert!(config.validate().is_ok());

        config.protocol.protocol_fee_bps = MAX_PROTOCOL_FEE_BPS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_rejected() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_round_trip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        create_default_config_file(path).unwrap();
        let loaded = AppConfig::load(path).unwrap();
        assert_eq!(loaded.server.port, 8402);
        assert_eq!(loaded.protocol.instance, "dev");
    }

    #[test]
    fn partial_file_uses_section_values() {
        let temp_file = NamedTempFile::new().unwrap();
        let config_str = r#"
[server]
host = "0.0.0.0"
port = 9000

[protocol]
instance = "prod-1"
token_symbol = "USDM"
chain_id = 8453
protocol_fee_bps = 250
delivery_deadline_secs = 1800
bond_lock_secs = 604800
max_commitment_age_secs = 300

[logging]
level = "debug"
"#;
        std::fs::write(temp_file.path(), config_str).unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.protocol.protocol_fee_bps, 250);
        assert_eq!(config.protocol.instance, "prod-1");
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
