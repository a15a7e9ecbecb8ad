use crate::error::{BlindControlError, Result};
use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

const DEFAULT_POLL_PERIOD_MS: u64 = 30_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;

/// Use default config if no path is provided.
/// An explicit `base_url` wins over every other source.
pub fn get_configuration(config: Option<PathBuf>, base_url: Option<String>) -> Result<AppConfig> {
    let mut settings = config::Config::builder();

    if let Some(config) = config {
        settings = settings.add_source(config::File::from(config));
    } else {
        // a missing base_url is still caught when deserializing
        settings = settings
            .add_source(config::File::with_name("configuration/settings").required(false))
            .add_source(config::File::with_name("configuration/dev_settings").required(false));
    }

    settings = settings.add_source(
        config::Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__"),
    );

    build_configuration(override_base_url(settings, base_url)?)
}

fn override_base_url(
    settings: ConfigBuilder<DefaultState>,
    base_url: Option<String>,
) -> Result<ConfigBuilder<DefaultState>> {
    match base_url {
        Some(base_url) => Ok(settings.set_override("blinds_service.base_url", base_url)?),
        None => Ok(settings),
    }
}

fn build_configuration(settings: ConfigBuilder<DefaultState>) -> Result<AppConfig> {
    let app_config: AppConfig = settings.build()?.try_deserialize()?;
    app_config.validate()?;
    Ok(app_config)
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub blinds_service: BlindsServiceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    fn validate(&self) -> Result<()> {
        if self.blinds_service.base_url.trim().is_empty() {
            return Err(BlindControlError::Configuration(ConfigError::Message(
                "blinds_service.base_url is empty".to_owned(),
            )));
        }
        if self.polling.period_ms == 0 {
            return Err(BlindControlError::Configuration(ConfigError::Message(
                "polling.period_ms must be greater than zero".to_owned(),
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct BlindsServiceConfig {
    /// Everything up to, not including, `/blinds`
    pub base_url: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    #[serde(default = "default_poll_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl PollingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_POLL_PERIOD_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

fn default_poll_period_ms() -> u64 {
    DEFAULT_POLL_PERIOD_MS
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}
