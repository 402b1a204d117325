use super::BrokerConfig;
use crate::Result;
use config::{Config, Environment};

impl BrokerConfig {
    /// Build a configuration from `TIDEMQ_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("TIDEMQ").try_parsing(true))
            .build()
            .map_err(|e| crate::TidemqError::Config(e.to_string()))?;

        let config = settings
            .try_deserialize::<BrokerConfig>()
            .map_err(|e| crate::TidemqError::Config(e.to_string()))?;

        config.validate().map_err(crate::TidemqError::Config)?;
        Ok(config)
    }
}
