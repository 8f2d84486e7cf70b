//! Wires the components together and owns their lifetimes.
//!
//! Start-up order: validate configuration, recover sessions left open by a
//! crash, make sure a profile is active, connect, then spawn the daily
//! scheduler and the poll loop. Shutdown cancels one root token; the poll
//! loop finishes its current tick, interrupts any open drive and
//! disconnects the adapter before the scheduler is joined.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::DiagnosticAdapter,
    alerts::{validate_thresholds, AnomalyEvaluator},
    clock::Clock,
    config::AppConfig,
    connection::ConnectionManager,
    db::{Database, Profile},
    drive::DriveSessionController,
    events::EventBus,
    polling::{loop_worker::PollerParts, PollOutcome, Poller, PollerController},
    retention::{scheduler::StatisticsRecomputeJob, DailyScheduler, RetentionManager},
    statistics::StatisticsEngine,
    telemetry::TelemetrySink,
    vehicle::{StaticDataResolver, VinDecoder},
};

/// External collaborators handed to [`Pipeline::start`].
pub struct PipelineDeps {
    pub adapter: Box<dyn DiagnosticAdapter>,
    pub decoder: Arc<dyn VinDecoder>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

pub struct Pipeline {
    db: Database,
    events: EventBus,
    connection: Arc<ConnectionManager>,
    statistics: StatisticsEngine,
    retention: RetentionManager,
    poller: PollerController,
    scheduler: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Fails on invalid configuration (before anything is touched) and when
    /// the adapter cannot be reached within the backoff schedule; the
    /// latter error downcasts to [`crate::error::ConnectionError`].
    pub async fn start(
        config: &AppConfig,
        db: Database,
        deps: PipelineDeps,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        config.validate()?;

        for session in db.interrupt_open_drive_sessions().await? {
            warn!(
                "Recovered drive session {} left open; marked Interrupted at {:?}",
                session.id, session.end_time
            );
        }

        let profile = ensure_active_profile(&db, &config.default_profile_id).await?;
        validate_thresholds(&format!("profile {}", profile.id), &profile.thresholds)?;

        let PipelineDeps {
            adapter,
            decoder,
            telemetry,
            clock,
            events,
        } = deps;

        let shutdown = CancellationToken::new();
        let connection = Arc::new(ConnectionManager::new(
            adapter,
            config.adapter.address.clone(),
            config.connection.clone(),
            telemetry.clone(),
            shutdown.child_token(),
        )?);

        let statistics = StatisticsEngine::new(
            db.clone(),
            config.statistics.clone(),
            clock.clone(),
            events.clone(),
        )?;
        let retention = RetentionManager::new(
            db.clone(),
            config.retention.clone(),
            telemetry,
            clock.clone(),
        )?;
        let drive = DriveSessionController::new(
            config.drive.clone(),
            db.clone(),
            statistics.clone(),
            events.clone(),
        )?;

        connection
            .connect()
            .await
            .context("adapter unavailable")?;

        let mut scheduler = DailyScheduler::new(config.retention.run_at_hour, clock.clone())
            .with_job(Arc::new(retention.clone()));
        if config.statistics.daily_recompute {
            scheduler = scheduler.with_job(Arc::new(StatisticsRecomputeJob {
                engine: statistics.clone(),
                db: db.clone(),
            }));
        }
        let scheduler = tokio::spawn(scheduler.run(shutdown.child_token()));

        let poller = Poller::new(
            PollerParts {
                connection: connection.clone(),
                db: db.clone(),
                drive,
                anomalies: AnomalyEvaluator::new(db.clone(), events.clone()),
                resolver: StaticDataResolver::new(db.clone(), decoder, clock.clone()),
                events: events.clone(),
                clock,
                default_thresholds: config.alerts.default_thresholds.clone(),
                default_profile_id: config.default_profile_id.clone(),
                parameter_timeout: config.polling.parameter_timeout(),
            },
            shutdown.child_token(),
        );
        let mut controller = PollerController::new();
        controller.start(poller, config.polling.default_interval(), end_time)?;

        info!("Pipeline started with profile {}", profile.id);
        Ok(Self {
            db,
            events,
            connection,
            statistics,
            retention,
            poller: controller,
            scheduler: Some(scheduler),
            shutdown,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn statistics(&self) -> &StatisticsEngine {
        &self.statistics
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    /// Resolves when the poll loop ends on its own (end time reached or
    /// connection failed). Cancel-safe.
    pub async fn wait(&mut self) -> Result<Option<PollOutcome>> {
        self.poller.wait().await
    }

    pub async fn shutdown(mut self) -> Result<Option<PollOutcome>> {
        info!("Pipeline shutting down");
        self.shutdown.cancel();

        let outcome = self.poller.stop().await?;

        if let Some(handle) = self.scheduler.take() {
            handle.await.context("daily scheduler task failed to join")?;
        }

        // Covers a poll loop that already exited on its own.
        self.connection.release().await;

        info!("Pipeline stopped");
        Ok(outcome)
    }
}

/// Returns the active profile, creating and activating the default one
/// when none is active.
async fn ensure_active_profile(db: &Database, default_profile_id: &str) -> Result<Profile> {
    if let Some(profile) = db.get_active_profile().await? {
        return Ok(profile);
    }

    if db.get_profile(default_profile_id).await?.is_none() {
        info!("Creating default profile {default_profile_id}");
        db.upsert_profile(&Profile::new(default_profile_id, "Default"))
            .await?;
    }
    db.set_active_profile(default_profile_id).await?;

    db.get_active_profile()
        .await?
        .context("default profile missing after activation")
}
