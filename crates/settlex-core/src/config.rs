//! Runtime configuration resolved once at startup.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use settlex_warehouse::WarehouseConfig;
use thiserror::Error;

use crate::coordinator::SingleFlightPolicy;

pub const DEFAULT_BASE_URL: &str = "https://www.hkex.com.hk/eng/stat/dmstat/datadownload";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot resolve a home directory; set SETTLEX_HOME")]
    MissingHome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlexConfig {
    /// Root for databases and the raw-file archive.
    pub home: PathBuf,
    pub base_url: String,
    /// Archive directory for downloaded files. `None` disables archiving.
    pub data_dir: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub fetch_attempts: u32,
    pub store_timeout: Duration,
    pub store_attempts: u32,
    pub query_ttl: Duration,
    pub dates_ttl: Duration,
    pub single_flight: SingleFlightPolicy,
    pub max_pool_size: usize,
}

impl SettlexConfig {
    /// Defaults rooted at `home`.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            data_dir: Some(home.join("raw")),
            home,
            base_url: DEFAULT_BASE_URL.to_owned(),
            fetch_timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            store_timeout: Duration::from_secs(5),
            store_attempts: 3,
            query_ttl: Duration::from_secs(30 * 60),
            dates_ttl: Duration::from_secs(60 * 60),
            single_flight: SingleFlightPolicy::Join,
            max_pool_size: 4,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve configuration from `lookup`, which plays the role of the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let home = match lookup("SETTLEX_HOME") {
            Some(home) => PathBuf::from(home),
            None => lookup("HOME")
                .map(|home| Path::new(&home).join(".settlex"))
                .ok_or(ConfigError::MissingHome)?,
        };

        let mut config = Self::under(home);
        if let Some(base_url) = lookup("SETTLEX_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_owned();
        }
        if let Some(data_dir) = lookup("SETTLEX_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Some(value) = lookup("SETTLEX_FETCH_TIMEOUT_MS") {
            config.fetch_timeout = Duration::from_millis(positive("SETTLEX_FETCH_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("SETTLEX_FETCH_ATTEMPTS") {
            config.fetch_attempts = attempts("SETTLEX_FETCH_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("SETTLEX_STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(positive("SETTLEX_STORE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("SETTLEX_STORE_ATTEMPTS") {
            config.store_attempts = attempts("SETTLEX_STORE_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("SETTLEX_QUERY_TTL_SECS") {
            config.query_ttl = Duration::from_secs(positive("SETTLEX_QUERY_TTL_SECS", &value)?);
        }
        if let Some(value) = lookup("SETTLEX_DATES_TTL_SECS") {
            config.dates_ttl = Duration::from_secs(positive("SETTLEX_DATES_TTL_SECS", &value)?);
        }
        if let Some(value) = lookup("SETTLEX_SINGLE_FLIGHT") {
            config.single_flight =
                value
                    .parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: "SETTLEX_SINGLE_FLIGHT",
                        value: value.clone(),
                        reason,
                    })?;
        }
        Ok(config)
    }

    /// Database layout below `home`.
    pub fn warehouse(&self) -> WarehouseConfig {
        WarehouseConfig {
            max_pool_size: self.max_pool_size,
            ..WarehouseConfig::under(&self.home)
        }
    }
}

fn positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(key, value, "must be greater than zero")),
        Ok(parsed) => Ok(parsed),
        Err(error) => Err(invalid(key, value, &error.to_string())),
    }
}

fn attempts(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    let parsed = positive(key, value)?;
    u32::try_from(parsed).map_err(|_| invalid(key, value, "too many attempts"))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_hang_off_home() {
        let config = SettlexConfig::from_lookup(lookup(&[("HOME", "/home/ops")])).expect("config");
        assert_eq!(config.home, PathBuf::from("/home/ops/.settlex"));
        assert_eq!(
            config.warehouse().series_db_path,
            PathBuf::from("/home/ops/.settlex/db/series.duckdb")
        );
        assert_eq!(config.data_dir, Some(PathBuf::from("/home/ops/.settlex/raw")));
        assert_eq!(config.single_flight, SingleFlightPolicy::Join);
        assert_eq!(config.query_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SettlexConfig::from_lookup(lookup(&[
            ("SETTLEX_HOME", "/srv/settlex"),
            ("SETTLEX_BASE_URL", "http://mirror.local/files/"),
            ("SETTLEX_STORE_ATTEMPTS", "5"),
            ("SETTLEX_DATES_TTL_SECS", "60"),
            ("SETTLEX_SINGLE_FLIGHT", "reject"),
        ]))
        .expect("config");

        assert_eq!(config.home, PathBuf::from("/srv/settlex"));
        assert_eq!(config.base_url, "http://mirror.local/files");
        assert_eq!(config.store_attempts, 5);
        assert_eq!(config.dates_ttl, Duration::from_secs(60));
        assert_eq!(config.single_flight, SingleFlightPolicy::Reject);
    }

    #[test]
    fn bad_values_name_their_key() {
        let err = SettlexConfig::from_lookup(lookup(&[
            ("SETTLEX_HOME", "/srv"),
            ("SETTLEX_FETCH_ATTEMPTS", "0"),
        ]))
        .expect_err("zero attempts");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "SETTLEX_FETCH_ATTEMPTS", .. }
        ));
    }

    #[test]
    fn missing_home_is_reported() {
        let err = SettlexConfig::from_lookup(lookup(&[])).expect_err("no home");
        assert_eq!(err, ConfigError::MissingHome);
    }
}
