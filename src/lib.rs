pub mod adapter;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod connection;
pub mod db;
pub mod drive;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod polling;
pub mod retention;
pub mod statistics;
pub mod telemetry;
pub mod testing;
mod utils;
pub mod vehicle;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};

use adapter::{AdapterConfig, DiagnosticAdapter, Elm327Adapter, SimulatedAdapter};
use clock::{Clock, SystemClock};
use config::AppConfig;
use db::Database;
use error::ConnectionError;
use events::EventBus;
use pipeline::{Pipeline, PipelineDeps};
use polling::StopReason;
use telemetry::{DatabaseSink, TelemetrySink};
use vehicle::{NhtsaDecoder, VinDecoder};

fn build_adapter(config: &AdapterConfig, simulate: bool) -> Box<dyn DiagnosticAdapter> {
    if simulate {
        Box::new(SimulatedAdapter::new())
    } else {
        Box::new(Elm327Adapter::new(Duration::from_millis(config.read_timeout_ms)))
    }
}

/// Runs the pipeline until Ctrl-C.
///
/// When the real adapter ends up `Failed` (at start-up or after a lost link
/// that could not be re-established) and `adapter.fallback_to_simulated` is
/// set, the pipeline is restarted on the simulated adapter.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = AppConfig::path_from_env();
    let config = AppConfig::load(&config_path)?;
    config.validate()?;

    let db = Database::new(config.database_path.clone()).with_context(|| {
        format!("Failed to open database at {}", config.database_path.display())
    })?;
    info!("Database initialized at {}", db.path().display());

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(DatabaseSink::spawn(db.clone()));
    let decoder: Arc<dyn VinDecoder> = Arc::new(NhtsaDecoder::new(
        config.vehicle.decoder_url.clone(),
        Duration::from_secs(config.vehicle.timeout_secs),
    )?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::new();

    let mut simulate = config.adapter.simulate;
    loop {
        let can_fall_back = !simulate && config.adapter.fallback_to_simulated;
        let deps = PipelineDeps {
            adapter: build_adapter(&config.adapter, simulate),
            decoder: decoder.clone(),
            telemetry: telemetry.clone(),
            clock: clock.clone(),
            events: events.clone(),
        };

        let mut pipeline = match Pipeline::start(&config, db.clone(), deps, None).await {
            Ok(pipeline) => pipeline,
            Err(err) if can_fall_back && err.downcast_ref::<ConnectionError>().is_some() => {
                warn!("{err:#}; falling back to the simulated adapter");
                simulate = true;
                continue;
            }
            Err(err) => return Err(err),
        };

        let finished = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Failed to listen for Ctrl-C: {err}");
                }
                None
            }
            outcome = pipeline.wait() => Some(outcome?),
        };

        let outcome = pipeline.shutdown().await?;
        let Some(finished) = finished else {
            info!("Interrupted; stopped after {:?}", outcome);
            return Ok(());
        };

        match finished {
            Some(outcome) if outcome.reason == StopReason::ConnectionFailed && can_fall_back => {
                warn!("Adapter connection failed; falling back to the simulated adapter");
                simulate = true;
            }
            other => {
                info!("Poll loop finished: {other:?}");
                return Ok(());
            }
        }
    }
}
