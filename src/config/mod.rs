use crate::core::error::ProbeError;
use serde::Deserialize;
use std::{fs, path::Path};

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "public".to_string()
}

/// Connection parameters for one broker session. Rebuilt per run from file
/// and flags, never mutated afterwards.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BrokerConfig, ProbeError> {
    let raw: String =
        fs::read_to_string(&path).map_err(|e| ProbeError::Config(e.to_string()))?;
    let config: BrokerConfig =
        toml::from_str(&raw).map_err(|e| ProbeError::Config(e.to_string()))?;
    Ok(config)
}
