use tracing::{debug, error, info, trace, warn};

fn main() {
    // Run with `RUST_LOG=trace` to see every level.
    cellmon_telemetry::TelemetryConfig::new().init();

    trace!("TRACE");
    debug!(command = "AT+CSQ", "DEBUG");
    info!("INFO");
    warn!("WARN");
    error!("ERROR");
}
