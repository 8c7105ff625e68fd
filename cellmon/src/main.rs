use cellmon::config::{Cli, Config};
use clap::Parser;
use color_eyre::eyre::Result;

const SYSLOG_IDENTIFIER: &str = "cellmon";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    cellmon_telemetry::TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli);

    cellmon::run(config).await
}
