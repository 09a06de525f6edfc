use crate::commandline::CliArgs;
use anyhow::{Context, Result};
use pqbms_lib::bluetooth::{ConnectOptions, Uuid, BMS_CHARACTERISTIC, DEFAULT_SCAN_TIMEOUT};
use pqbms_lib::poller::DEFAULT_RESPONSE_TIMEOUT;
use serde::Deserialize;
use std::time::Duration;

/// Connection and polling settings, from the command line or a YAML file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    device_name: String,
    #[serde(default = "Settings::default_characteristic")]
    characteristic: String,
    #[serde(default = "Settings::default_scan_timeout", with = "humantime_serde")]
    scan_timeout: Duration,
    #[serde(
        default = "Settings::default_response_timeout",
        with = "humantime_serde"
    )]
    response_timeout: Duration,
}

impl Settings {
    fn default_characteristic() -> String {
        BMS_CHARACTERISTIC.to_string()
    }

    fn default_scan_timeout() -> Duration {
        DEFAULT_SCAN_TIMEOUT
    }

    fn default_response_timeout() -> Duration {
        DEFAULT_RESPONSE_TIMEOUT
    }

    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            device_name: args.device_name.clone(),
            characteristic: args.characteristic.clone(),
            scan_timeout: args.scan_timeout,
            response_timeout: args.timeout,
        }
    }

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let settings: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(settings)
    }

    pub fn connect_options(&self) -> Result<ConnectOptions> {
        let characteristic = Uuid::parse_str(&self.characteristic)
            .with_context(|| format!("Invalid characteristic UUID '{}'", self.characteristic))?;
        Ok(ConnectOptions {
            device_name: self.device_name.clone(),
            characteristic,
            scan_timeout: self.scan_timeout,
        })
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }
}
