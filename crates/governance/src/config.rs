//! Bot configuration file
//!
//! ```json
//! {
//!   "database": "dao",
//!   "clientId": "123456789012345678",
//!   "token": "...",
//!   "rpcUrl": "https://rpc.example.org",
//!   "contractAddress": "0x...",
//!   "guildId": "987654321098765432"
//! }
//! ```

use crate::types::{Address, AddressError, UserId};
use serde::{Deserialize, Deserializer};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Missing required setting `{0}`")]
    Missing(&'static str),
    #[error("Invalid contract address: {0}")]
    ContractAddress(#[from] AddressError),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Base name of the on-disk database
    #[serde(default = "default_database")]
    pub database: String,
    /// The bot's own user id; reactions it adds are never counted
    #[serde(deserialize_with = "snowflake", default)]
    pub client_id: UserId,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub contract_address: String,
    /// Register slash commands on one guild instead of globally
    #[serde(deserialize_with = "optional_snowflake", default)]
    pub guild_id: Option<u64>,
}

fn default_database() -> String {
    "dao".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Number(u64),
    Text(String),
}

impl Snowflake {
    fn value<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Snowflake::Number(n) => Ok(n),
            Snowflake::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id: {s}"))),
        }
    }
}

fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UserId, D::Error> {
    Snowflake::deserialize(deserializer)?.value().map(UserId)
}

fn optional_snowflake<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    Option::<Snowflake>::deserialize(deserializer)?
        .map(Snowflake::value)
        .transpose()
}

impl BotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_json_slice(&bytes)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check that everything needed to connect is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("token"));
        }
        if self.client_id == UserId(0) {
            return Err(ConfigError::Missing("clientId"));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("rpcUrl"));
        }
        self.contract()?;
        Ok(())
    }

    pub fn contract(&self) -> Result<Address, ConfigError> {
        if self.contract_address.trim().is_empty() {
            return Err(ConfigError::Missing("contractAddress"));
        }
        Ok(self.contract_address.trim().parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "database": "governance",
        "clientId": "123456789012345678",
        "token": "secret",
        "rpcUrl": "http://localhost:8545",
        "contractAddress": "0x00000000000000000000000000000000000000AB",
        "guildId": 42
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = BotConfig::from_json_slice(FULL.as_bytes()).unwrap();
        assert_eq!(config.database, "governance");
        assert_eq!(config.client_id, UserId(123456789012345678));
        assert_eq!(config.guild_id, Some(42));
        config.validate().unwrap();
        assert_eq!(
            config.contract().unwrap().as_str(),
            "0x00000000000000000000000000000000000000ab"
        );
    }

    #[test]
    fn test_defaults_and_missing_token() {
        let config = BotConfig::from_json_slice(br#"{"clientId": 7}"#).unwrap();
        assert_eq!(config.database, "dao");
        assert_eq!(config.client_id, UserId(7));
        assert!(config.guild_id.is_none());
        assert!(matches!(config.validate(), Err(ConfigError::Missing("token"))));
    }

    #[test]
    fn test_rejects_bad_client_id() {
        let err = BotConfig::from_json_slice(br#"{"clientId": "bot"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_bad_contract() {
        let mut config = BotConfig::from_json_slice(FULL.as_bytes()).unwrap();
        config.contract_address = "0x1234".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ContractAddress(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, FULL).unwrap();
        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.token, "secret");

        let missing = BotConfig::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
