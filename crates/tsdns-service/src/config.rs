use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::repository::RepositoryConfig;

/// The port queries are served on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 41144;

/// How log lines are rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `pretty` when attached to a terminal, `simplified` otherwise.
    Auto,
    /// Multi-line, colored output for humans.
    Pretty,
    /// One line per event without colors.
    Simplified,
    /// One JSON object per event.
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Maximum level of events logged by the tsdns crates, unless `RUST_LOG` says otherwise.
    #[serde(deserialize_with = "deserialize_level")]
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Sets `RUST_BACKTRACE` on startup.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// `host:port` of the statsd server. Defaults to `$STATSD_SERVER`, metrics are off if unset.
    pub statsd: Option<String>,
    /// Prepended to every metric name.
    pub prefix: String,
    /// Tags attached to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "tsdns".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// The configuration of the `tsdns` binary, usually loaded from a YAML file.
///
/// Every field is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The IP address to listen on. `0.0.0.0` listens on all interfaces.
    pub bind_ip: String,

    /// The TCP port to listen on.
    pub port: u16,

    /// How often the in-memory records are reloaded from the repository.
    ///
    /// Every record mutation issued through the server reloads immediately, this interval
    /// picks up changes made to the repository by anything else.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// How long a client may take to send its query.
    ///
    /// Connections that have not delivered a query in time are dropped without a response.
    /// `null` waits indefinitely.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Option<Duration>,

    /// The storage backend for records.
    pub repository: RepositoryConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_ip: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            refresh_interval: Duration::from_secs(30),
            query_timeout: Some(Duration::from_secs(10)),
            repository: RepositoryConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let yaml = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_yaml(&yaml)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_yaml(yaml: &str) -> Result<Self> {
        // reject empty documents explicitly
        if yaml.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(yaml).context("failed to parse config YAML")
    }

    fn validate(&self) -> Result<()> {
        self.bind_ip
            .parse::<IpAddr>()
            .with_context(|| format!("invalid bind_ip: {}", self.bind_ip))?;
        if self.refresh_interval.is_zero() {
            anyhow::bail!("refresh_interval must not be zero");
        }
        Ok(())
    }
}

fn deserialize_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelFilter, D::Error> {
    let level = String::deserialize(deserializer)?;
    level
        .parse()
        .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&level), &"a log level"))
}
