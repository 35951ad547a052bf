use std::path::Path;

use crate::config::schema::{Config, StoreConfig};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    // An empty document deserializes to unit, not to an all-default mapping.
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Checks the cross-field constraints serde cannot express.
///
/// Also run by the CLI after flags were merged over the file values.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(invalid("workers must be at least 1"));
    }
    if config.report_limit == 0 {
        return Err(invalid("report_limit must be at least 1"));
    }

    match &config.store {
        StoreConfig::Sqlite { path } if path.as_os_str().is_empty() => {
            return Err(invalid("store.path must not be empty"));
        }
        StoreConfig::Postgres {
            url,
            max_connections,
        } => {
            if url.trim().is_empty() {
                return Err(invalid("store.url must not be empty"));
            }
            if *max_connections == 0 {
                return Err(invalid("store.max_connections must be at least 1"));
            }
        }
        StoreConfig::Sqlite { .. } => {}
    }

    let quota = &config.quota;
    if quota.daily_ceiling == 0 || quota.per_second_ceiling == 0 {
        return Err(invalid("quota ceilings must be greater than 0"));
    }
    let smallest_ceiling = quota.daily_ceiling.min(quota.per_second_ceiling);
    for (name, cost) in [
        ("list_cost", quota.list_cost),
        ("fetch_cost", quota.fetch_cost),
        ("delete_cost", quota.delete_cost),
    ] {
        if cost > smallest_ceiling {
            return Err(ConfigError::CostAboveCeiling {
                name: name.to_string(),
                cost,
                ceiling: smallest_ceiling,
            });
        }
    }

    if config.mailbox.api_base.trim().is_empty() {
        return Err(invalid("mailbox.api_base must not be empty"));
    }
    if config.mailbox.user.trim().is_empty() {
        return Err(invalid("mailbox.user must not be empty"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
