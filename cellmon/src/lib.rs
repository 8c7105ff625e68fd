use color_eyre::eyre::{Result, WrapErr as _};
use config::{Config, Mode, SamplingConfig, ServerConfig};
use modem::ModemSession;
use sampler::SamplingLoop;
use std::sync::Arc;
use store::{OperatorsCatalog, ReadingStore};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod api;
pub mod at;
pub mod config;
pub mod modem;
pub mod parser;
pub mod reading;
pub mod sampler;
pub mod store;
pub mod transport;

pub async fn run(config: Config) -> Result<()> {
    let modem = Arc::new(ModemSession::new(
        config.serial.clone(),
        config.serial.timeout,
    ));

    match config.mode {
        Mode::Status => status(modem).await,
        Mode::Sample(ref sampling) => sample(&config, modem, sampling).await,
        Mode::Serve(ref server) => serve(&config, modem, server).await,
    }
}

async fn status(modem: Arc<ModemSession>) -> Result<()> {
    let status = tokio::task::spawn_blocking(move || {
        if !modem.connect() {
            warn!("modem unavailable, all probes will report unknown");
        }
        serde_json::json!({
            "status": modem.status(),
            "operator": modem.operator(),
            "network_type": modem.network_type(),
            "location": modem.location(),
        })
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

async fn sample(
    config: &Config,
    modem: Arc<ModemSession>,
    sampling: &SamplingConfig,
) -> Result<()> {
    let store = ReadingStore::open(&config.storage.readings_path)
        .await
        .wrap_err("failed to open reading store")?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let sampling_loop = SamplingLoop::new(sampling.count, sampling.interval);
    let readings = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if !modem.connect() {
                warn!("modem unavailable, readings will be marked unavailable");
            }
            sampling_loop.run(&modem, &cancel)
        })
        .await?
    };
    signals.abort();

    let saved = store.save_sampled(readings).await?;
    info!(count = saved.len(), path = ?store.path(), "stored readings");

    println!("{}", serde_json::to_string_pretty(&saved)?);

    Ok(())
}

async fn serve(config: &Config, modem: Arc<ModemSession>, server: &ServerConfig) -> Result<()> {
    let store = ReadingStore::open(&config.storage.readings_path)
        .await
        .wrap_err("failed to open reading store")?;
    let operators = OperatorsCatalog::open(&config.storage.operators_path)
        .await
        .wrap_err("failed to open operators catalog")?;

    let connected = {
        let modem = Arc::clone(&modem);
        tokio::task::spawn_blocking(move || modem.connect()).await?
    };
    if !connected {
        warn!("no modem found, live status will report the module as not detected");
    }

    let app = api::create_app(api::AppState {
        store: Arc::new(store),
        operators: Arc::new(operators),
        modem,
    });

    let listener = tokio::net::TcpListener::bind(server.listen)
        .await
        .wrap_err_with(|| format!("failed to bind {}", server.listen))?;
    info!("listening on {}", server.listen);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) -> Result<()> {
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigint.recv()  => warn!("received SIGINT"),
    }
    cancel.cancel();

    Ok(())
}
