use anyhow::Result;
use log::{error, info};
use pqbms_lib::poller::{PollOutcome, Poller};
use pqbms_lib::protocol::{CommandCatalog, Response};
use pqbms_lib::transport::Transport;
use serde_json::json;
use std::time::Duration;

use crate::commandline::OutputFormat;

/// Human readable rendering of one polling pass.
pub fn format_text(outcomes: &[PollOutcome]) -> String {
    let mut text = String::new();
    for outcome in outcomes {
        let name = outcome.command.name();
        match &outcome.result {
            Ok(Response::BatteryInfo(info)) => {
                text.push_str(&format!("{name}: {info:?}\n"));
                text.push_str(&format!(
                    "{name}: {} | {} | {} | {}\n",
                    info.battery_status, info.balance_status, info.cell_status, info.heat_status
                ));
            }
            Ok(response) => text.push_str(&format!("{name}: {response:?}\n")),
            Err(err) => text.push_str(&format!("{name}: error: {err}\n")),
        }
    }
    text
}

/// JSON object keyed by command name, failed commands carry an `error` member.
pub fn to_json(outcomes: &[PollOutcome], timestamp: &str) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert("timestamp".to_string(), json!(timestamp));
    for outcome in outcomes {
        let value = match &outcome.result {
            Ok(response) => serde_json::to_value(response).unwrap_or_else(|e| {
                error!("Failed to serialize '{}': {e}", outcome.command.name());
                json!({ "error": e.to_string() })
            }),
            Err(err) => json!({ "error": err.to_string() }),
        };
        data.insert(outcome.command.name().to_string(), value);
    }
    serde_json::Value::Object(data)
}

pub async fn run<T: Transport>(
    poller: &mut Poller<T>,
    catalog: &CommandCatalog,
    interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    info!("Starting daemon mode: format={format:?}, interval={interval:?}");

    loop {
        let outcomes = poller.poll_all(catalog).await;

        match format {
            OutputFormat::Text => {
                println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
                print!("{}", format_text(&outcomes));
                println!("--------------------------");
            }
            OutputFormat::Json => {
                let value = to_json(&outcomes, &chrono::Utc::now().to_rfc3339());
                println!("{value}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping daemon");
                break;
            }
        }
    }
    Ok(())
}
