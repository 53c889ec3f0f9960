//! CLI Entry Point for prologix-gpib
//!
//! Sends one query to one instrument and prints the reply:
//!
//! ```bash
//! prologix-gpib 192.168.1.50 12 "*IDN?"
//! ```
//!
//! Progress and errors go to stderr; stdout carries only the reply.
//! Set `RUST_LOG=debug` to see the traffic with the adapter.

use anyhow::{Context, Result};
use clap::Parser;
use prologix_gpib::logging::{self, TracingConfig};
use prologix_gpib::{ControllerConfig, GpibController};
use std::time::Duration;

/// Timeout used by the CLI for connect, reads and writes.
const CLI_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "prologix-gpib")]
#[command(
    about = "Query a GPIB instrument through a Prologix GPIB-ETHERNET controller",
    long_about = None
)]
struct Cli {
    /// Controller IP address or hostname
    ip: String,

    /// GPIB primary address of the instrument (passed through unchecked)
    #[arg(allow_negative_numbers = true)]
    gpib_address: i32,

    /// Command to send, e.g. "*IDN?"
    query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Argument errors print usage and exit before anything touches the network
    let cli = Cli::parse();

    logging::init(TracingConfig::default()).map_err(anyhow::Error::msg)?;

    let response = run(&cli).await?;
    println!("{}", response);
    Ok(())
}

async fn run(cli: &Cli) -> Result<String> {
    let config = ControllerConfig::new(&cli.ip).with_timeout(CLI_TIMEOUT);
    query_instrument(config, cli.gpib_address, &cli.query).await
}

/// Connect, run one query, and close the session whatever the outcome.
async fn query_instrument(config: ControllerConfig, address: i32, query: &str) -> Result<String> {
    let host = config.host.clone();
    let mut controller = GpibController::connect_with_config(config)
        .await
        .with_context(|| format!("Failed to connect to controller at {}", host))?;

    query_and_close(&mut controller, address, query).await
}

async fn query_and_close(
    controller: &mut GpibController,
    address: i32,
    query: &str,
) -> Result<String> {
    let response = controller
        .ask_device(address, query)
        .await
        .with_context(|| format!("Query {:?} to GPIB address {} failed", query, address));

    controller.close().await;
    response
}
