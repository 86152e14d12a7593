//! CLI settings: defaults < TOML file < `HOPPER_` environment variables.
//!
//! Nested keys use a double underscore, e.g. `HOPPER_QUEUE__MAX_SIZE=500` or
//! `HOPPER_REDIS__ADDR=redis.internal:6379`.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use hopper_core::QueueConfig;
use hopper_redis::RedisConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueConfig,
    pub redis: RedisConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix("HOPPER"))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(
                &path.to_string_lossy(),
                FileFormat::Toml,
            ));
        }
        builder = builder.add_source(
            env.prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.queue.validate().context("invalid [queue] settings")?;
        settings.redis.validate().context("invalid [redis] settings")?;
        Ok(settings)
    }
}
