use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};

use crate::{
    sampler::{DEFAULT_SAMPLE_COUNT, DEFAULT_SAMPLE_INTERVAL},
    store::{OPERATORS_FILE, READINGS_FILE},
    transport::{SerialConfig, DEFAULT_BAUD_RATE},
};

/// Primary application configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub storage: StorageConfig,
    pub mode: Mode,
}

/// Where readings and reference data live on disk
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub readings_path: PathBuf,
    pub operators_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub count: usize,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Status,
    Sample(SamplingConfig),
    Serve(ServerConfig),
}

impl Config {
    /// Create a new config from CLI arguments
    pub fn from_cli(cli: &Cli) -> Self {
        let serial = SerialConfig {
            port: cli.port.clone(),
            baud_rate: cli.baud,
            timeout: Duration::from_millis(cli.timeout_ms),
        };

        let storage = StorageConfig {
            readings_path: cli.data_dir.join(READINGS_FILE),
            operators_path: cli.data_dir.join(OPERATORS_FILE),
        };

        let mode = match &cli.command {
            Command::Status => Mode::Status,
            Command::Sample {
                count,
                interval_secs,
            } => Mode::Sample(SamplingConfig {
                count: *count,
                interval: Duration::from_secs(*interval_secs),
            }),
            Command::Serve { listen } => Mode::Serve(ServerConfig { listen: *listen }),
        };

        Self {
            serial,
            storage,
            mode,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(
        short = 'p',
        long = "port",
        env = "CELLMON_PORT",
        default_value = "/dev/ttyUSB0",
        help = "Path to the modem serial device"
    )]
    pub port: String,

    #[arg(long = "baud", default_value_t = DEFAULT_BAUD_RATE, help = "Serial baud rate")]
    pub baud: u32,

    #[arg(
        long = "timeout-ms",
        default_value = "1000",
        help = "Time to wait for each AT response, in milliseconds"
    )]
    pub timeout_ms: u64,

    #[arg(
        short = 'd',
        long = "data-dir",
        env = "CELLMON_DATA_DIR",
        default_value = "data",
        help = "Directory holding the readings and operators JSON files"
    )]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Probe the modem once and print its status as JSON.
    Status,

    /// Collect a batch of readings and append them to the store.
    Sample {
        #[arg(short = 'n', long = "count", default_value_t = DEFAULT_SAMPLE_COUNT)]
        count: usize,

        #[arg(
            long = "interval-secs",
            default_value_t = DEFAULT_SAMPLE_INTERVAL.as_secs(),
            help = "Delay between samples, in seconds"
        )]
        interval_secs: u64,
    },

    /// Serve the JSON API.
    Serve {
        #[arg(long = "listen", env = "CELLMON_LISTEN", default_value = "0.0.0.0:5000")]
        listen: SocketAddr,
    },
}
