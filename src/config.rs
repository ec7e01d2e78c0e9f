use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Expected polling cadence; a margin-delta baseline older than this is
    /// flagged stale.
    pub ingest_interval_ms: i64,
    /// Time-proximity window for grouping orphan closing fills.
    pub aggregation_window_ms: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let ingest_interval_ms = parse_positive_i64(&env_map, "INGEST_INTERVAL_MS", "300000")?;
        let aggregation_window_ms =
            parse_positive_i64(&env_map, "AGGREGATION_WINDOW_MS", "60000")?;

        Ok(Config {
            port,
            database_path,
            ingest_interval_ms,
            aggregation_window_ms,
        })
    }
}

fn parse_positive_i64(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<i64, ConfigError> {
    let value = env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<i64>()
        .map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid i64".to_string())
        })?;

    if value <= 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be positive".to_string(),
        ));
    }

    Ok(value)
}
