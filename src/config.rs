//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Prefix for environment overrides, e.g. `GATEKEEPER_RATE=50`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// The rate limiting algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Permits accumulate up to `burst_size` and are spent per request.
    #[default]
    TokenBucket,
    /// Requests are counted in aligned, non-overlapping windows.
    FixedWindow,
    /// Requests are counted in a window that ends at "now".
    SlidingWindow,
    /// Occupancy drains over time and requests add to it.
    LeakyBucket,
}

impl AlgorithmKind {
    /// Stable name used in logs, metadata and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::FixedWindow => "fixed_window",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlgorithmKind {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            "fixed_window" => Ok(AlgorithmKind::FixedWindow),
            "sliding_window" => Ok(AlgorithmKind::SlidingWindow),
            "leaky_bucket" => Ok(AlgorithmKind::LeakyBucket),
            other => Err(GatekeeperError::Config(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}

/// Quota configuration for a rate limiter.
///
/// Immutable once handed to a limiter. Durations are written as milliseconds
/// (`window_ms`, `cleanup_interval_ms`) so the struct maps directly onto YAML
/// files and environment variables. Fractional milliseconds are accepted and
/// kept, so a window built from a [`Duration`] is never rounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Algorithm to run
    #[serde(default)]
    pub algorithm: AlgorithmKind,

    /// Permits per window
    pub rate: u64,

    /// Window length
    #[serde(rename = "window_ms", with = "duration_millis", default = "default_window")]
    pub window: Duration,

    /// Capacity of the bucket algorithms; zero means "same as rate"
    #[serde(default)]
    pub burst_size: u64,

    /// Background cleanup period; zero disables it
    #[serde(rename = "cleanup_interval_ms", with = "duration_millis", default)]
    pub cleanup_interval: Duration,
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

/// Durations as milliseconds: whole values stay integers, sub-millisecond
/// precision is carried as a fraction.
mod duration_millis {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Whole(u64),
        Fractional(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.subsec_nanos() % 1_000_000 == 0 {
            u64::try_from(d.as_millis())
                .unwrap_or(u64::MAX)
                .serialize(s)
        } else {
            (d.as_nanos() as f64 / 1_000_000.0).serialize(s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = match Millis::deserialize(d)? {
            Millis::Whole(ms) => return Ok(Duration::from_millis(ms)),
            Millis::Fractional(ms) => ms,
            Millis::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| D::Error::custom(format!("invalid milliseconds '{}'", text)))?,
        };
        let nanos = (ms * 1_000_000.0).round();
        if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
            return Err(D::Error::custom(format!("invalid milliseconds {}", ms)));
        }
        Ok(Duration::from_nanos(nanos as u64))
    }
}

impl LimiterConfig {
    /// Create a configuration for `rate` permits per `window`.
    pub fn new(algorithm: AlgorithmKind, rate: u64, window: Duration) -> Self {
        Self {
            algorithm,
            rate,
            window,
            burst_size: 0,
            cleanup_interval: Duration::ZERO,
        }
    }

    /// Set the bucket capacity.
    pub fn with_burst_size(mut self, burst_size: u64) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// Enable the background cleanup loop.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The cleanup period, or `None` when cleanup is disabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (!self.cleanup_interval.is_zero()).then_some(self.cleanup_interval)
    }

    /// Bucket capacity after defaulting an unset burst size to `rate`.
    pub fn effective_burst_size(&self) -> u64 {
        if self.burst_size == 0 {
            self.rate
        } else {
            self.burst_size
        }
    }

    /// TTL applied to every persisted state entry.
    pub fn state_ttl(&self) -> Duration {
        self.window().saturating_mul(2)
    }

    /// Reject configurations no algorithm can run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(GatekeeperError::InvalidConfiguration(
                "rate must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(GatekeeperError::InvalidConfiguration(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, then apply `GATEKEEPER_*`
    /// environment overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading limiter configuration");
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<LimiterConfig>())
            .map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
algorithm: leaky_bucket
rate: 30
window_ms: 60000
burst_size: 10
cleanup_interval_ms: 5000
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::LeakyBucket);
        assert_eq!(config.rate, 30);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.effective_burst_size(), 10);
        assert_eq!(config.cleanup_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_defaults() {
        let config = LimiterConfig::from_yaml("rate: 100").unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::TokenBucket);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.cleanup_interval(), None);
        assert_eq!(config.effective_burst_size(), 100);
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let result = LimiterConfig::from_yaml("algorithm: gcra\nrate: 1");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = LimiterConfig::new(AlgorithmKind::FixedWindow, 0, Duration::from_secs(1));
        assert!(matches!(
            config.validate(),
            Err(GatekeeperError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = LimiterConfig::new(AlgorithmKind::FixedWindow, 10, Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(GatekeeperError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_sub_millisecond_windows_are_kept() {
        let config = LimiterConfig::new(AlgorithmKind::TokenBucket, 10, Duration::from_micros(1500));
        assert_eq!(config.window(), Duration::from_micros(1500));
        assert_eq!(config.state_ttl(), Duration::from_micros(3000));

        let short = LimiterConfig::new(AlgorithmKind::FixedWindow, 10, Duration::from_micros(500));
        assert!(short.validate().is_ok());

        let odd = LimiterConfig::new(AlgorithmKind::SlidingWindow, 10, Duration::from_nanos(60_000_999_999));
        assert_eq!(odd.window(), Duration::from_nanos(60_000_999_999));

        let cleanup = short.with_cleanup_interval(Duration::from_micros(250));
        assert_eq!(cleanup.cleanup_interval(), Some(Duration::from_micros(250)));
    }

    #[test]
    fn test_fractional_milliseconds_in_yaml() {
        let config = LimiterConfig::from_yaml("rate: 10\nwindow_ms: 1.5\n").unwrap();
        assert_eq!(config.window(), Duration::from_micros(1500));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(LimiterConfig::from_yaml(&yaml).unwrap(), config);

        let whole = LimiterConfig::new(AlgorithmKind::FixedWindow, 3, Duration::from_secs(2));
        assert!(serde_yaml::to_string(&whole).unwrap().contains("window_ms: 2000"));
    }

    #[test]
    fn test_negative_window_rejected() {
        let result = LimiterConfig::from_yaml("rate: 10\nwindow_ms: -5\n");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_state_ttl_is_two_windows() {
        let config = LimiterConfig::new(AlgorithmKind::SlidingWindow, 5, Duration::from_secs(30));
        assert_eq!(config.state_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("token_bucket".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::TokenBucket);
        assert_eq!("Sliding-Window".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::SlidingWindow);
        assert!("nope".parse::<AlgorithmKind>().is_err());
        assert_eq!(AlgorithmKind::LeakyBucket.to_string(), "leaky_bucket");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "algorithm: fixed_window\nrate: 7\nwindow_ms: 1000\n").unwrap();

        let config = LimiterConfig::from_file(&path).unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::FixedWindow);
        assert_eq!(config.rate, 7);

        let layered = LimiterConfig::load(path.to_str()).unwrap();
        assert_eq!(layered.rate, 7);
        assert_eq!(layered.window(), Duration::from_secs(1));

        std::fs::remove_file(&path).unwrap();
    }
}
