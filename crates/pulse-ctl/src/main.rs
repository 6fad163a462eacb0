//! Pulse Controller - Main Entry Point

use pulse_ctl::{init_logging, run, CtlConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1);
    let config = CtlConfig::load(path.as_deref())?;
    init_logging(&config.log_level)?;

    info!("=== Pulse Controller v{} ===", env!("CARGO_PKG_VERSION"));

    let report = run(&config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
