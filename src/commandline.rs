use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pqbms_lib::bluetooth::BMS_CHARACTERISTIC;
use std::time::Duration;

pub const DEFAULT_DEVICE_NAME: &str = "P-24100BNN160-A00714";

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show firmware version, manufacture date and hardware version
    Version,
    /// Show battery telemetry: voltages, current, capacity, temperatures and derived status
    Battery,
    /// Show the serial number reply as hex
    SerialNumber,
    /// Poll every command once
    All,
    /// Run in daemon mode, periodically polling every command
    Daemon {
        /// Interval between polling passes (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
        /// Output format for each polling pass
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

const fn about_text() -> &'static str {
    "power queen bms bluetooth command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised Bluetooth name of the BMS
    #[arg(short, long, default_value = DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// UUID of the characteristic used for commands and notifications
    #[arg(long, default_value_t = BMS_CHARACTERISTIC.to_string())]
    pub characteristic: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Give up when the BMS is not found within this total scan time (e.g., "30s", "1m")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "30s")]
    pub scan_timeout: Duration,

    /// Time to wait for the reply to each command (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "1s")]
    pub timeout: Duration,

    /// YAML configuration file, replaces the connection options above
    #[arg(long)]
    pub config: Option<String>,
}
