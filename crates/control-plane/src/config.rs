use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_config::{StaticConfigItem, STATIC_CONFIG_TABLE};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(str::to_string)
            .or_else(|| default_value(key))
            .unwrap_or_default()
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|value| value.parse::<i64>().ok())
            .or_else(|| default_value(key).and_then(|value| value.parse::<i64>().ok()))
            .unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .and_then(parse_bool)
            .or_else(|| default_value(key).and_then(|value| parse_bool(&value)))
            .unwrap_or(false)
    }

    /// Comma-separated string value, trimmed, empty entries dropped, order kept.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_string(key)
            .split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
    #[error("invalid value for key {0}: {1}")]
    Invalid(String, String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let value: toml::Value =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        let mut errors = Vec::new();
        flatten_values(&mut values, String::new(), &value, &mut errors);
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        Ok(SystemConfig { values })
    }
}

/// Typed view of the keys the routing core consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterSettings {
    pub memory_cache_enabled: bool,
    pub sync_frequency: Duration,
    pub auto_groups: Vec<String>,
    pub distributed_rate_limit: bool,
    pub redis_url: Option<String>,
    pub rate_limit_window: Duration,
    pub store_timeout: Duration,
    pub rate_limit_key_prefix: String,
}

impl RouterSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let redis_url = config.get_string("cache.redis_url");
        let redis_url = (!redis_url.trim().is_empty()).then(|| redis_url.trim().to_string());
        let distributed_rate_limit = config.get_bool("rate_limit.distributed");
        if distributed_rate_limit && redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "rate_limit.distributed".to_string(),
                "requires cache.redis_url".to_string(),
            ));
        }
        Ok(Self {
            memory_cache_enabled: config.get_bool("cache.memory_enabled"),
            sync_frequency: positive_seconds(config, "cache.sync_frequency_seconds")?,
            auto_groups: config.get_list("routing.auto_groups"),
            distributed_rate_limit,
            redis_url,
            rate_limit_window: positive_seconds(config, "rate_limit.window_seconds")?,
            store_timeout: Duration::from_millis(
                config.get_number("rate_limit.store_timeout_ms").max(1) as u64,
            ),
            rate_limit_key_prefix: config.get_string("rate_limit.key_prefix"),
        })
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            memory_cache_enabled: true,
            sync_frequency: Duration::from_secs(60),
            auto_groups: Vec::new(),
            distributed_rate_limit: false,
            redis_url: None,
            rate_limit_window: Duration::from_secs(60),
            store_timeout: Duration::from_millis(500),
            rate_limit_key_prefix: "rate_limit".to_string(),
        }
    }
}

fn positive_seconds(config: &SystemConfig, key: &str) -> Result<Duration, ConfigError> {
    let value = config.get_number(key);
    if value <= 0 {
        return Err(ConfigError::Invalid(
            key.to_string(),
            format!("must be positive, got {value}"),
        ));
    }
    Ok(Duration::from_secs(value as u64))
}

fn flatten_values(
    output: &mut HashMap<String, String>,
    prefix: String,
    value: &toml::Value,
    errors: &mut Vec<ConfigError>,
) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let new_prefix = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_values(output, new_prefix, nested, errors);
            }
        }
        toml::Value::String(value) => {
            insert_checked(output, &prefix, value.to_string(), "string", errors);
        }
        toml::Value::Integer(value) => {
            insert_checked(output, &prefix, value.to_string(), "number", errors);
        }
        toml::Value::Boolean(value) => {
            insert_checked(output, &prefix, value.to_string(), "boolean", errors);
        }
        toml::Value::Array(items) => {
            // Lists of strings are stored in their comma-separated form.
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(entry) => entries.push(entry.to_string()),
                    None => {
                        errors.push(ConfigError::TypeMismatch(prefix, "string".to_string()));
                        return;
                    }
                }
            }
            insert_checked(output, &prefix, entries.join(","), "string", errors);
        }
        _ => {
            errors.push(ConfigError::TypeMismatch(
                prefix,
                "string|number|boolean".to_string(),
            ));
        }
    }
}

fn insert_checked(
    output: &mut HashMap<String, String>,
    key: &str,
    value: String,
    expected_type: &str,
    errors: &mut Vec<ConfigError>,
) {
    let Some(item) = config_item(key) else {
        errors.push(ConfigError::UnknownKey(key.to_string()));
        return;
    };
    if item.value_type != expected_type {
        errors.push(ConfigError::TypeMismatch(
            key.to_string(),
            item.value_type.to_string(),
        ));
        return;
    }
    output.insert(key.to_string(), value);
}

fn config_item(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}

fn default_value(key: &str) -> Option<String> {
    config_item(key).map(|item| item.default_value.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Renders every known key with its default, for writing a starter config file.
pub fn default_config_toml() -> String {
    let mut sections: Vec<(&str, Vec<&StaticConfigItem>)> = Vec::new();
    for item in STATIC_CONFIG_TABLE {
        let section = item.key.split('.').next().unwrap_or_default();
        match sections.iter_mut().find(|(name, _)| *name == section) {
            Some((_, items)) => items.push(item),
            None => sections.push((section, vec![item])),
        }
    }
    let mut out = String::new();
    for (section, items) in sections {
        out.push_str(&format!("[{section}]\n"));
        for item in items {
            let name = item.key.split_once('.').map(|(_, name)| name).unwrap_or(item.key);
            out.push_str(&format!("# {}\n", item.description));
            match item.value_type {
                "string" => out.push_str(&format!("{name} = {:?}\n", item.default_value)),
                _ => out.push_str(&format!("{name} = {}\n", item.default_value)),
            }
        }
        out.push('\n');
    }
    out
}
