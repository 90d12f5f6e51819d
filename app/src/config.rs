use std::collections::HashMap;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use serde::{Deserialize, Serialize};

use infra::persistence::postgres::DocumentConnectionManager;

const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub db: PostgresConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Settings that may be overridden from `RUSTAURANT_*` variables.
#[derive(Deserialize, Debug, Default, PartialEq)]
struct EnvOverrides {
    postgres_url: Option<String>,
    pool_size: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct EnvLogger {
    level: Option<LogLevel>,
    #[serde(default)]
    modules: HashMap<String, LogLevel>,
    #[serde(default)]
    timestamp_nanos: bool,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("parse config")?;
        Ok(config)
    }

    /// Applies `RUSTAURANT_POSTGRES_URL` and `RUSTAURANT_POOL_SIZE`.
    pub fn with_env_overrides(self) -> Result<Self> {
        let overrides = envy::prefixed("RUSTAURANT_")
            .from_env::<EnvOverrides>()
            .context("read RUSTAURANT_* environment")?;
        Ok(self.overridden_by(overrides))
    }

    fn overridden_by(mut self, overrides: EnvOverrides) -> Self {
        if let Some(url) = overrides.postgres_url {
            debug!("Database url taken from environment");
            self.db.url = url;
        }
        if let Some(pool_size) = overrides.pool_size {
            self.db.pool_size = pool_size;
        }
        self
    }
}

impl PostgresConfig {
    pub(crate) fn build(&self) -> Result<Pool<DocumentConnectionManager>> {
        debug!("Build pool of {} connections", self.pool_size);

        let manager = DocumentConnectionManager::from_url(&self.url)?;

        let builder = r2d2::Pool::builder().max_size(self.pool_size);

        debug!("Pool builder: {:?}", builder);
        let pool = builder.build(manager).context("build pool")?;

        Ok(pool)
    }
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl EnvLogger {
    pub fn builder(&self) -> env_logger::Builder {
        let mut b = env_logger::Builder::from_default_env();
        if let Some(level) = self.level {
            b.filter_level(level.to_filter());
        }

        for (module, level) in self.modules.iter() {
            b.filter_module(module, level.to_filter());
        }

        if self.timestamp_nanos {
            b.format_timestamp_nanos();
        }

        b
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"
        [db]
        url = "postgres://kitchen@localhost/rustaurant"

        [env_logger]
        level = "info"
        timestamp_nanos = true
        [env_logger.modules]
        "rustaurant::production" = "debug"
    "#;

    #[derive(Deserialize, Debug)]
    struct WithLogger {
        #[serde(flatten)]
        config: Config,
        env_logger: EnvLogger,
    }

    #[test]
    fn reads_database_section_with_default_pool() -> Result<()> {
        let config = Config::from_toml(SAMPLE)?;

        assert_eq!(config.db.url, "postgres://kitchen@localhost/rustaurant");
        assert_eq!(config.db.pool_size, DEFAULT_POOL_SIZE);
        Ok(())
    }

    #[test]
    fn reads_logger_section_alongside() -> Result<()> {
        let both: WithLogger = toml::from_str(SAMPLE)?;

        assert_eq!(both.env_logger.level, Some(LogLevel::Info));
        assert!(both.env_logger.timestamp_nanos);
        assert_eq!(
            both.env_logger.modules.get("rustaurant::production"),
            Some(&LogLevel::Debug)
        );
        Ok(())
    }

    #[test]
    fn environment_overrides_win() -> Result<()> {
        let config = Config::from_toml(SAMPLE)?.overridden_by(EnvOverrides {
            postgres_url: Some("postgres://elsewhere/db".into()),
            pool_size: Some(3),
        });

        assert_eq!(config.db.url, "postgres://elsewhere/db");
        assert_eq!(config.db.pool_size, 3);
        Ok(())
    }

    #[test]
    fn overrides_are_read_from_prefixed_variables() -> Result<()> {
        let vars = vec![
            ("RUSTAURANT_POOL_SIZE".to_string(), "4".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let overrides: EnvOverrides = envy::prefixed("RUSTAURANT_").from_iter(vars)?;

        assert_eq!(
            overrides,
            EnvOverrides {
                postgres_url: None,
                pool_size: Some(4),
            }
        );
        Ok(())
    }

    #[test]
    fn missing_url_is_an_error() {
        assert!(Config::from_toml("[db]\npool_size = 2\n").is_err());
    }
}
