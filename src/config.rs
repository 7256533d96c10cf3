use crate::prelude::*;
use crate::voltronic::command;
use crate::voltronic::telemetry::ScaleFactors;

use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_BAUD_RATE: u32 = 2400;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10000;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_LOGLEVEL: &str = "info";

/// Where to look when no config file is given on the command line.
pub const SEARCH_PATH: [&str; 2] = ["./inverter.conf", "/etc/inverter/inverter.conf"];

// anything shorter cannot hold start byte, one character, checksum and CR
const MIN_REPLY_LEN: usize = 4;

/// Settings for one inverter. Every numeric setting is optional; the
/// accessors supply protocol defaults for the ones left unset.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: String,

    pub amperage_factor: Option<f64>,
    pub watt_factor: Option<f64>,

    pub qpiri: Option<usize>,
    pub qpiws: Option<usize>,
    pub qmod: Option<usize>,
    pub qpigs: Option<usize>,

    pub baud_rate: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
    pub retries: Option<u32>,

    pub loglevel: Option<String>,

    /// Settings this version does not know, kept so they can be reported
    /// once logging is up.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Config {
    /// Load `file`, or the first existing file on [`SEARCH_PATH`].
    pub fn find(file: Option<&str>) -> Result<Self, ConfigError> {
        match file {
            Some(file) => Self::new(file),
            None => {
                let file = SEARCH_PATH
                    .iter()
                    .find(|p| std::path::Path::new(p).exists())
                    .unwrap_or(&SEARCH_PATH[SEARCH_PATH.len() - 1]);
                Self::new(file)
            }
        }
    }

    /// Read a config file: YAML if the name ends in `.yaml`/`.yml`,
    /// `key=value` lines otherwise.
    ///
    /// Runs before the logger exists, so nothing is logged here; see
    /// [`Config::log_settings`].
    pub fn new(file: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file).map_err(|source| ConfigError::Read {
            path: file.to_string(),
            source,
        })?;

        if file.ends_with(".yaml") || file.ends_with(".yml") {
            Self::from_yaml(&content)
        } else {
            Self::from_key_values(&content)
        }
    }

    pub fn log_settings(&self) {
        let config = self;
        info!("Configuration loaded successfully:");
        info!("  Device: {}", config.device);
        info!("  Baud Rate: {}", config.baud_rate());
        info!("  Reply lengths: QPIGS={} QPIRI={} QMOD={} QPIWS={}",
            config.qpigs(), config.qpiri(), config.qmod(), config.qpiws());
        info!("  Amperage Factor: {}", config.amperage_factor());
        info!("  Watt Factor: {}", config.watt_factor());
        info!("  Poll Interval: {}ms", config.poll_interval().as_millis());
        info!("  Read Timeout: {}ms", config.read_timeout().as_millis());
        info!("  Retries: {}", config.retries());

        for key in config.unknown.keys() {
            warn!("ignoring unknown setting {}", key);
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse `inverter.conf` style content. `#` starts a comment line; an
    /// empty value leaves the setting unset.
    pub fn from_key_values(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax {
                    line: line_no,
                    text: line.to_string(),
                });
            };
            let (key, value) = (key.trim(), value.trim());
            if value.is_empty() {
                continue;
            }

            let invalid = || ConfigError::InvalidValue {
                line: line_no,
                key: key.to_string(),
                value: value.to_string(),
            };

            match key {
                "device" => config.device = value.to_string(),
                "amperage_factor" => config.amperage_factor = Some(value.parse().map_err(|_| invalid())?),
                "watt_factor" => config.watt_factor = Some(value.parse().map_err(|_| invalid())?),
                "qpiri" => config.qpiri = Some(value.parse().map_err(|_| invalid())?),
                "qpiws" => config.qpiws = Some(value.parse().map_err(|_| invalid())?),
                "qmod" => config.qmod = Some(value.parse().map_err(|_| invalid())?),
                "qpigs" => config.qpigs = Some(value.parse().map_err(|_| invalid())?),
                "baud_rate" => config.baud_rate = Some(value.parse().map_err(|_| invalid())?),
                "poll_interval_ms" => config.poll_interval_ms = Some(value.parse().map_err(|_| invalid())?),
                "read_timeout_ms" => config.read_timeout_ms = Some(value.parse().map_err(|_| invalid())?),
                "lock_timeout_ms" => config.lock_timeout_ms = Some(value.parse().map_err(|_| invalid())?),
                "retries" => config.retries = Some(value.parse().map_err(|_| invalid())?),
                "loglevel" => config.loglevel = Some(value.to_string()),
                _ => {
                    config
                        .unknown
                        .insert(key.to_string(), serde_yaml::Value::String(value.to_string()));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::Invalid("device must be set".to_string()));
        }

        for (name, factor) in [("amperage_factor", self.amperage_factor), ("watt_factor", self.watt_factor)] {
            if let Some(factor) = factor {
                if !factor.is_finite() || factor <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{} must be a positive number, got {}",
                        name, factor
                    )));
                }
            }
        }

        for (name, len) in [
            ("qpiri", self.qpiri),
            ("qpiws", self.qpiws),
            ("qmod", self.qmod),
            ("qpigs", self.qpigs),
        ] {
            if let Some(len) = len {
                if len < MIN_REPLY_LEN {
                    return Err(ConfigError::Invalid(format!(
                        "{} reply length must be at least {}, got {}",
                        name, MIN_REPLY_LEN, len
                    )));
                }
            }
        }

        if self.baud_rate == Some(0) {
            return Err(ConfigError::Invalid("baud_rate cannot be 0".to_string()));
        }
        if let Some(level) = &self.loglevel {
            if level.parse::<log::LevelFilter>().is_err() {
                return Err(ConfigError::Invalid(format!("unknown loglevel {}", level)));
            }
        }
        if self.read_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("read_timeout_ms cannot be 0".to_string()));
        }

        Ok(())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn amperage_factor(&self) -> f64 {
        self.amperage_factor.unwrap_or(1.0)
    }

    pub fn watt_factor(&self) -> f64 {
        self.watt_factor.unwrap_or(1.0)
    }

    pub fn scale_factors(&self) -> ScaleFactors {
        ScaleFactors {
            amperage: self.amperage_factor(),
            watt: self.watt_factor(),
        }
    }

    pub fn qpiri(&self) -> usize {
        self.qpiri.unwrap_or(command::QPIRI_REPLY_LEN)
    }

    pub fn qpiws(&self) -> usize {
        self.qpiws.unwrap_or(command::QPIWS_REPLY_LEN)
    }

    pub fn qmod(&self) -> usize {
        self.qmod.unwrap_or(command::QMOD_REPLY_LEN)
    }

    pub fn qpigs(&self) -> usize {
        self.qpigs.unwrap_or(command::QPIGS_REPLY_LEN)
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS))
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }

    pub fn loglevel(&self) -> &str {
        self.loglevel.as_deref().unwrap_or(DEFAULT_LOGLEVEL)
    }
}
