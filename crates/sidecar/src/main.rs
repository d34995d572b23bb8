//! Container-stats publishing sidecar
//!
//! Reads newline-delimited JSON batches from standard input (the driver
//! boundary) and republishes them through the embedded stats server.

use anyhow::Result;
use sidecar_lib::{build_env_filter, Publisher, SystemConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SystemConfig::load()?;
    let filter = build_env_filter(&config)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!(target: "publisher", address = %config.listen_addr(), "starting stats sidecar");

    let publisher = Publisher::new(config);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        if let Err(err) = publisher.publish(line.as_bytes()).await {
                            let message = format!("{err:#}");
                            error!(target: "publisher", error = %message,
                                "failed to publish batch");
                        }
                    }
                    Some(_) => {}
                    None => {
                        info!(target: "publisher", "input drained, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(target: "publisher", "SIGINT received, shutting down");
                break;
            }
        }
    }

    Ok(())
}
