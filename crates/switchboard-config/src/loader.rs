//! Configuration loading

use crate::Config;
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use switchboard_core::{Error, Result};

/// Prefix for environment variable overrides of pool settings
pub const ENV_PREFIX: &str = "SWITCHBOARD_POOL_";

/// Document format of a pool configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension, ignoring case
    pub fn detect(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            _ => Err(Error::Config(format!(
                "{}: pool config must be .yaml, .yml, .toml or .json",
                path.display()
            ))),
        }
    }
}

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let format = ConfigFormat::detect(path)?;

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match env::var(var_name) {
            Ok(val) => val,
            Err(_) => match default_value {
                Some(default) => default.to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "Environment variable '{var_name}' not set and no default provided"
                    )));
                }
            },
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded_content = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)?,
    };

    Ok(config)
}

/// Load configuration, optionally apply `SWITCHBOARD_POOL_*` overrides, and validate
pub fn load_config<P: AsRef<Path>>(path: P, env_overrides: bool) -> Result<Config> {
    let mut config = load_from_file(path)?;

    if env_overrides {
        apply_env_overrides(&mut config)?;
    }

    crate::validator::validate_config(&config)?;

    Ok(config)
}

/// Apply `SWITCHBOARD_POOL_*` overrides from the process environment
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    apply_env_overrides_from(config, |name| env::var(name).ok())
}

/// Apply pool overrides using the given variable lookup
///
/// Recognised names (after [`ENV_PREFIX`]): `MAX_CONNECTIONS_PER_SERVER`,
/// `MAX_CONNECTIONS_PER_SESSION`, `MAX_TOTAL_CONNECTIONS`, `IDLE_TIMEOUT`,
/// `CLEANUP_INTERVAL`, `SESSION_POOL_SYNC`, `CONNECT_TIMEOUT`,
/// `CLOSE_TIMEOUT`, `HEALTH_CHECK_TIMEOUT`. Durations use humantime syntax.
pub fn apply_env_overrides_from<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
    let pool = &mut config.pool;

    if let Some(v) = var("MAX_CONNECTIONS_PER_SERVER") {
        pool.max_connections_per_server = parse_number("MAX_CONNECTIONS_PER_SERVER", &v)?;
    }
    if let Some(v) = var("MAX_CONNECTIONS_PER_SESSION") {
        pool.max_connections_per_session = parse_number("MAX_CONNECTIONS_PER_SESSION", &v)?;
    }
    if let Some(v) = var("MAX_TOTAL_CONNECTIONS") {
        pool.max_total_connections = parse_number("MAX_TOTAL_CONNECTIONS", &v)?;
    }
    if let Some(v) = var("IDLE_TIMEOUT") {
        pool.idle_timeout = parse_duration("IDLE_TIMEOUT", &v)?;
    }
    if let Some(v) = var("CLEANUP_INTERVAL") {
        pool.cleanup_interval = parse_duration("CLEANUP_INTERVAL", &v)?;
    }
    if let Some(v) = var("SESSION_POOL_SYNC") {
        pool.session_pool_sync = parse_bool("SESSION_POOL_SYNC", &v)?;
    }
    if let Some(v) = var("CONNECT_TIMEOUT") {
        pool.connect_timeout = parse_duration("CONNECT_TIMEOUT", &v)?;
    }
    if let Some(v) = var("CLOSE_TIMEOUT") {
        pool.close_timeout = parse_duration("CLOSE_TIMEOUT", &v)?;
    }
    if let Some(v) = var("HEALTH_CHECK_TIMEOUT") {
        pool.health_check_timeout = parse_duration("HEALTH_CHECK_TIMEOUT", &v)?;
    }

    Ok(())
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: invalid number '{value}': {e}")))
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: invalid duration '{value}': {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{ENV_PREFIX}{name}: invalid boolean '{value}'"
        ))),
    }
}
