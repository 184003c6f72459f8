//! Runtime configuration with environment overrides.

use std::time::Duration;

use crate::ports::Accuracy;

/// API base used when `BINMAP_API_URL` is not set.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/";
/// Request timeout used when `BINMAP_TIMEOUT_MS` is not set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_USER_AGENT: &str = "binmap/0.1";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while reading configuration.
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Connection settings for the remote API.
pub struct ApiConfig {
    /// Base URL every endpoint path is joined to.
    pub base_url: String,
    /// Timeout applied to each request.
    pub timeout: Duration,
    /// User agent sent with each request.
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ApiConfig {
    /// Read `BINMAP_API_URL` and `BINMAP_TIMEOUT_MS` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the timeout is not a number of milliseconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the timeout is not a number of milliseconds.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(base_url) = lookup("BINMAP_API_URL").filter(|url| !url.trim().is_empty()) {
            config.base_url = base_url.trim().to_owned();
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "BINMAP_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Gating applied to the user location stream.
pub struct LocationOptions {
    /// Accuracy hint for the platform service.
    pub accuracy: Accuracy,
    /// Time after which a new fix is forwarded regardless of displacement.
    pub min_interval: Duration,
    /// Displacement in meters after which a new fix is forwarded regardless of time.
    pub min_distance_m: f64,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::Balanced,
            min_interval: Duration::from_secs(5),
            min_distance_m: 10.0,
        }
    }
}

impl LocationOptions {
    /// Read `BINMAP_LOCATION_INTERVAL_MS` and `BINMAP_LOCATION_DISTANCE_M`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the options from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value cannot be parsed, the
    /// interval is zero or the distance is negative.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Some(millis) = parse_var::<u64>(&lookup, "BINMAP_LOCATION_INTERVAL_MS")? {
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    key: "BINMAP_LOCATION_INTERVAL_MS",
                    value: millis.to_string(),
                });
            }
            options.min_interval = Duration::from_millis(millis);
        }
        if let Some(meters) = parse_var::<f64>(&lookup, "BINMAP_LOCATION_DISTANCE_M")? {
            if !meters.is_finite() || meters < 0.0 {
                return Err(ConfigError::Invalid {
                    key: "BINMAP_LOCATION_DISTANCE_M",
                    value: meters.to_string(),
                });
            }
            options.min_distance_m = meters;
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Behaviour of the map-data coordinator.
pub struct CoordinatorOptions {
    /// Load both collections as soon as the rendering surface is ready.
    pub auto_load: bool,
    /// Upper bound for a single collection fetch.
    pub fetch_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            auto_load: true,
            fetch_timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}
