use anyhow::{anyhow, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pqbms_lib::bluetooth;
use pqbms_lib::poller::Poller;
use pqbms_lib::protocol::{CommandCatalog, GET_BATTERY_INFO, GET_VERSION, SERIAL_NUMBER};
use pqbms_lib::transport::Transport;
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod daemon;

use commandline::{CliArgs, CliCommands};
use config::Settings;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .or_else(|| panic_info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<cause unknown>");

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

/// Polls the commands of `catalog` once and prints the replies.
///
/// Fails only when a single command was requested and it did not succeed.
async fn poll_once<T: Transport>(poller: &mut Poller<T>, catalog: &CommandCatalog) -> Result<()> {
    let outcomes = poller.poll_all(catalog).await;
    print!("{}", daemon::format_text(&outcomes));
    match outcomes.as_slice() {
        [outcome] => match &outcome.result {
            Ok(_) => Ok(()),
            Err(err) => Err(anyhow!("Cannot poll {}: {err}", outcome.command.name())),
        },
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::from_args(&args),
    };
    let options = settings.connect_options()?;

    let (connection, transport) = bluetooth::connect(&options)
        .await
        .with_context(|| format!("Cannot connect to BMS '{}'", options.device_name))?;

    let mut poller = Poller::new(transport);
    poller.set_timeout(settings.response_timeout());

    let catalog = CommandCatalog::default();
    let result = match args.command {
        CliCommands::Version => {
            poll_once(&mut poller, &catalog.select(&[GET_VERSION.name()])?).await
        }
        CliCommands::Battery => {
            poll_once(&mut poller, &catalog.select(&[GET_BATTERY_INFO.name()])?).await
        }
        CliCommands::SerialNumber => {
            poll_once(&mut poller, &catalog.select(&[SERIAL_NUMBER.name()])?).await
        }
        CliCommands::All => poll_once(&mut poller, &catalog).await,
        CliCommands::Daemon { interval, format } => {
            daemon::run(&mut poller, &catalog, interval, format).await
        }
    };

    drop(poller);
    if let Err(err) = connection.disconnect().await {
        warn!("Cannot disconnect from BMS: {err}");
    }

    result
}
