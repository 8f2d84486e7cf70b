use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::{PARAMETERS, VIN_PARAMETER},
    alerts::{effective_thresholds, AnomalyEvaluator},
    clock::Clock,
    connection::{ConnectionManager, ConnectionState},
    db::{Database, ParameterValue, Profile, Threshold},
    drive::DriveSessionController,
    error::ConnectionError,
    events::{EventBus, PipelineEvent},
    vehicle::StaticDataResolver,
};

use super::{effective_interval, ReadingBatch};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Cancelled,
    EndTime,
    /// Reconnection exhausted its schedule; the manager is `Failed`.
    ConnectionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub ticks: u64,
    pub reason: StopReason,
}

/// Everything one poll tick touches.
pub struct PollerParts {
    pub connection: Arc<ConnectionManager>,
    pub db: Database,
    pub drive: DriveSessionController,
    pub anomalies: AnomalyEvaluator,
    pub resolver: StaticDataResolver,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub default_thresholds: BTreeMap<String, Threshold>,
    pub default_profile_id: String,
    pub parameter_timeout: Duration,
}

/// The acquisition loop. Each tick runs to completion: parameter reads,
/// drive detection, anomaly evaluation, persistence, then publication.
/// Cancellation is only observed between ticks.
pub struct Poller {
    parts: PollerParts,
    cancel_token: CancellationToken,
    last_profile: Option<Profile>,
}

impl Poller {
    pub fn new(parts: PollerParts, cancel_token: CancellationToken) -> Self {
        Self {
            parts,
            cancel_token,
            last_profile: None,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Polls until `end_time`, cancellation, or a failed reconnect. The
    /// adapter link is closed and any open drive interrupted on the way out.
    pub async fn run(
        mut self,
        default_interval: Duration,
        end_time: Option<DateTime<Utc>>,
    ) -> PollOutcome {
        let mut ticks = 0u64;
        let mut vin_pending = true;

        let reason = loop {
            if self.cancel_token.is_cancelled() {
                break StopReason::Cancelled;
            }
            if end_time.is_some_and(|end| self.parts.clock.now() >= end) {
                break StopReason::EndTime;
            }
            if self.parts.connection.current_state() == ConnectionState::Failed {
                break StopReason::ConnectionFailed;
            }

            let tick_started = Instant::now();
            let profile = self.active_profile().await;
            let interval = effective_interval(profile.polling_interval_secs, default_interval);

            if vin_pending {
                vin_pending = false;
                self.resolve_vehicle().await;
            }

            let (batch, link_lost) = self.read_batch(&profile.id).await;
            self.process_batch(batch, &profile, interval).await;
            ticks += 1;

            if link_lost {
                log_warn!("Adapter link lost, reconnecting");
                match self.parts.connection.reconnect().await {
                    Ok(()) => vin_pending = true,
                    Err(ConnectionError::Cancelled) => break StopReason::Cancelled,
                    Err(err) => {
                        log_error!("Reconnect failed: {err}");
                        break StopReason::ConnectionFailed;
                    }
                }
            }

            tokio::select! {
                _ = sleep_until(tick_started + interval) => {}
                _ = self.cancel_token.cancelled() => break StopReason::Cancelled,
            }
        };

        log_info!("Poll loop stopping after {ticks} ticks ({reason:?})");
        self.parts.drive.finish(self.parts.clock.now()).await;
        // A failed reconnect leaves the manager `Failed` for the caller to act on.
        self.parts.connection.release().await;

        PollOutcome { ticks, reason }
    }

    /// Re-read every tick so a profile switch applies from the next tick.
    async fn active_profile(&mut self) -> Profile {
        match self.parts.db.get_active_profile().await {
            Ok(Some(profile)) => {
                self.last_profile = Some(profile.clone());
                profile
            }
            Ok(None) => Profile::new(
                self.parts.default_profile_id.clone(),
                self.parts.default_profile_id.clone(),
            ),
            Err(err) => {
                log_warn!("Active profile lookup failed, keeping previous: {err:?}");
                self.last_profile.clone().unwrap_or_else(|| {
                    Profile::new(
                        self.parts.default_profile_id.clone(),
                        self.parts.default_profile_id.clone(),
                    )
                })
            }
        }
    }

    async fn resolve_vehicle(&self) {
        let read = timeout(
            self.parts.parameter_timeout,
            self.parts.connection.query(VIN_PARAMETER),
        )
        .await;

        match read {
            Ok(Ok(ParameterValue::Text(vin))) => {
                let vehicle = self.parts.resolver.resolve(&vin).await;
                if vehicle.is_unknown() {
                    log_info!("Connected to vehicle {} (static data unavailable)", vehicle.vin);
                } else {
                    log_info!(
                        "Connected to vehicle {} ({} {})",
                        vehicle.vin,
                        vehicle.make.as_deref().unwrap_or("?"),
                        vehicle.model.as_deref().unwrap_or("?")
                    );
                }
            }
            Ok(Ok(other)) => log_warn!("Unexpected VIN value {other:?}"),
            Ok(Err(err)) => log_warn!("VIN unavailable: {err}"),
            Err(_) => log_warn!("VIN read timed out"),
        }
    }

    /// Reads every catalogued parameter. A failed read nulls that field
    /// only; once the link is gone the remaining fields are nulled without
    /// asking the adapter.
    async fn read_batch(&self, profile_id: &str) -> (ReadingBatch, bool) {
        let mut batch = ReadingBatch::new(self.parts.clock.now(), profile_id);
        let mut link_lost = false;

        for spec in PARAMETERS {
            if link_lost {
                batch.push(spec.name, spec.unit, None);
                continue;
            }

            let read = timeout(
                self.parts.parameter_timeout,
                self.parts.connection.query(spec.name),
            )
            .await;

            let value = match read {
                Ok(Ok(value)) => Some(value),
                Ok(Err(err)) if err.is_link_loss() => {
                    link_lost = true;
                    log_warn!("Reading {} lost the link: {err}", spec.name);
                    None
                }
                Ok(Err(err)) => {
                    log_debug!("Reading {} failed: {err}", spec.name);
                    None
                }
                Err(_) => {
                    log_debug!("Reading {} timed out", spec.name);
                    None
                }
            };
            batch.push(spec.name, spec.unit, value);
        }

        (batch, link_lost)
    }

    async fn process_batch(&mut self, batch: ReadingBatch, profile: &Profile, interval: Duration) {
        self.parts.drive.observe(&batch, interval).await;

        let thresholds = effective_thresholds(&self.parts.default_thresholds, Some(profile));
        self.parts.anomalies.process(&batch, &thresholds).await;

        if let Err(err) = self.parts.db.insert_readings(&batch.to_readings()).await {
            log_error!("Failed to persist tick {}: {err:?}", batch.timestamp);
        }

        self.parts
            .events
            .publish(PipelineEvent::Batch(Arc::new(batch)));
    }
}
