//! Settings of the simulation binary, read from an optional `roundup.toml`
//! and overridden by `ROUNDUP_*` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Seed for random-mode selection; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    pub notification_capacity: usize,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("roundup")
    }

    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("log_level", "warn")?
            .set_default("notification_capacity", 64)?
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix("ROUNDUP").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
