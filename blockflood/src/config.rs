//! Configuration for blockflood.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `BF__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `BF__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `BF__CONCURRENCY=256` raises the number of uploads in flight
//! - `BF__STORAGE__TYPE=memory` uploads into process memory instead of a real store
//! - `BF__LOGGING__LEVEL=debug` enables debug logs
//!
//! The storage credential is deliberately not part of this configuration. It is read from
//! `AZURE_STORAGE_CONNECTION_STRING`, see [`blockflood_store::credential`].
//!
//! # YAML Configuration File
//!
//! ```yaml
//! container: flood
//! blob: flood.bin
//! block_size: 8MiB
//! concurrency: 256
//! poll_interval: 5s
//! max_wait: 30m
//! request_timeout: 2m
//! storage:
//!   type: azure
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::wait::PollPolicy;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BF__";

/// The store blocks are uploaded to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// Azure Blob Storage, authorised through `AZURE_STORAGE_CONNECTION_STRING`.
    Azure,
    /// Process memory. Useful for dry runs of the upload machinery.
    Memory,
}

/// Logging options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// `RUST_LOG` overrides this, either with a plain level or with a full filter directive.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `BF__LOGGING__LEVEL`
    #[serde(with = "level_filter")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The store to upload to.
    ///
    /// # Default
    ///
    /// `azure`
    pub storage: Storage,

    /// The container holding the blob. All cooperating instances must agree on it.
    ///
    /// # Default
    ///
    /// `blockflood`
    pub container: String,

    /// The name of the blob assembled from the blocks.
    ///
    /// # Default
    ///
    /// `blockflood.bin`
    pub blob: String,

    /// The size of every block.
    ///
    /// # Default
    ///
    /// `4MiB`
    pub block_size: ByteSize,

    /// The maximum number of block uploads in flight in this instance.
    ///
    /// # Default
    ///
    /// `128`
    pub concurrency: usize,

    /// The pause between two polls of the uncommitted block list.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long the coordinator waits for other instances before giving up. `null` waits
    /// forever.
    ///
    /// # Default
    ///
    /// `1h`
    #[serde(with = "humantime_serde")]
    pub max_wait: Option<Duration>,

    /// How long a single request to the store may take before it counts as failed. `null`
    /// disables the timeout, so a stalled connection can hold up the run indefinitely.
    ///
    /// # Default
    ///
    /// `2m`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Logging options.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: Storage::Azure,
            container: "blockflood".into(),
            blob: "blockflood.bin".into(),
            block_size: ByteSize::mib(4),
            concurrency: 128,
            poll_interval: Duration::from_secs(5),
            max_wait: Some(Duration::from_secs(60 * 60)),
            request_timeout: Some(Duration::from_secs(2 * 60)),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.block_size.as_u64() == 0 {
            bail!("block size must not be zero");
        }
        if self.request_timeout.is_some_and(|timeout| timeout.is_zero()) {
            bail!("request timeout must not be zero");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must not be zero");
        }
        if self.container.is_empty() || self.blob.is_empty() {
            bail!("container and blob names must not be empty");
        }
        Ok(())
    }

    /// The polling policy of the commit coordinator.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_wait: self.max_wait,
        }
    }
}

/// Reads log levels as plain strings such as `info` or `DEBUG`.
mod level_filter {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(|_| {
            de::Error::custom(format_args!(
                "invalid log level `{value}`, expected one of off, error, warn, info, debug, trace"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            assert_eq!(config.storage, Storage::Azure);
            assert_eq!(config.concurrency, 128);
            assert_eq!(config.block_size, ByteSize::mib(4));
            assert_eq!(config.poll_interval, Duration::from_secs(5));
            assert_eq!(config.max_wait, Some(Duration::from_secs(3600)));
            assert_eq!(config.request_timeout, Some(Duration::from_secs(120)));
            assert_eq!(config.logging.level, LevelFilter::INFO);
            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BF__STORAGE__TYPE", "memory");
            jail.set_env("BF__CONCURRENCY", "256");
            jail.set_env("BF__BLOCK_SIZE", "1MiB");
            jail.set_env("BF__POLL_INTERVAL", "250ms");
            jail.set_env("BF__LOGGING__LEVEL", "debug");
            jail.set_env("BF__REQUEST_TIMEOUT", "30s");

            let config = Config::load(None).unwrap();
            assert_eq!(config.storage, Storage::Memory);
            assert_eq!(config.concurrency, 256);
            assert_eq!(config.block_size, ByteSize::mib(1));
            assert_eq!(config.poll_interval, Duration::from_millis(250));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: memory
            container: flood
            blob: flood.bin
            max_wait: 30m
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.storage, Storage::Memory);
            assert_eq!(config.container, "flood");
            assert_eq!(config.blob, "flood.bin");
            assert_eq!(config.max_wait, Some(Duration::from_secs(30 * 60)));
            assert_eq!(
                config.poll_policy(),
                PollPolicy {
                    interval: Duration::from_secs(5),
                    max_wait: Some(Duration::from_secs(30 * 60)),
                }
            );

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile.write_all(b"concurrency: 8\n").unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("BF__CONCURRENCY", "16");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.concurrency, 16);

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_log_level() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BF__LOGGING__LEVEL", "loud");
            let err = Config::load(None).unwrap_err();
            assert!(format!("{err:#}").contains("invalid log level `loud`"));
            Ok(())
        });
    }

    #[test]
    fn rejects_zero_concurrency() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BF__CONCURRENCY", "0");
            assert!(Config::load(None).is_err());
            Ok(())
        });
    }
}
