use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    adapter::parameters::RPM,
    db::{Database, DriveSession, DriveSessionStatus},
    error::ConfigError,
    events::{EventBus, PipelineEvent},
    polling::ReadingBatch,
    statistics::StatisticsEngine,
};

use super::{DriveDetector, DriveDetectorConfig, DriveState, DriveTransition};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Couples the detector to the store: opens a session row on a confirmed
/// start, closes it on a confirmed end and runs the session's statistics
/// before announcing that post-drive analysis may begin.
pub struct DriveSessionController {
    detector: DriveDetector,
    db: Database,
    statistics: StatisticsEngine,
    events: EventBus,
    open_session: Option<DriveSession>,
}

impl DriveSessionController {
    pub fn new(
        config: DriveDetectorConfig,
        db: Database,
        statistics: StatisticsEngine,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            detector: DriveDetector::new(config)?,
            db,
            statistics,
            events,
            open_session: None,
        })
    }

    pub fn state(&self) -> DriveState {
        self.detector.state()
    }

    pub fn open_session(&self) -> Option<&DriveSession> {
        self.open_session.as_ref()
    }

    /// Evaluates the batch that just completed. Store failures are logged;
    /// the in-memory state machine keeps going regardless.
    pub async fn observe(&mut self, batch: &ReadingBatch, interval: Duration) {
        let rpm = batch.numeric(RPM);
        match self.detector.observe(rpm, batch.timestamp, interval) {
            Some(DriveTransition::Started { at }) => self.open(at, &batch.profile_id).await,
            Some(DriveTransition::Ended { at }) => self.complete(at).await,
            None => {}
        }
    }

    async fn open(&mut self, at: DateTime<Utc>, profile_id: &str) {
        let session = DriveSession {
            id: Uuid::new_v4().to_string(),
            start_time: at,
            end_time: None,
            profile_id: profile_id.to_string(),
            status: DriveSessionStatus::Open,
        };

        if let Err(err) = self.db.insert_drive_session(&session).await {
            log_error!("Failed to persist drive session {}: {err:?}", session.id);
        }
        log_info!("Drive started at {} (session {})", at, session.id);

        self.events
            .publish(PipelineEvent::DriveStarted(session.clone()));
        self.open_session = Some(session);
    }

    async fn complete(&mut self, at: DateTime<Utc>) {
        let Some(mut session) = self.open_session.take() else {
            log_warn!("Drive end confirmed with no open session");
            return;
        };

        if let Err(err) = self
            .db
            .close_drive_session(&session.id, at, DriveSessionStatus::Completed)
            .await
        {
            log_error!("Failed to close drive session {}: {err:?}", session.id);
        }
        session.end_time = Some(at);
        session.status = DriveSessionStatus::Completed;
        log_info!(
            "Drive ended at {} (session {}, {}s)",
            at,
            session.id,
            session.duration_secs().unwrap_or_default()
        );
        self.events.publish(PipelineEvent::DriveEnded(session.clone()));

        match self.statistics.calculate_session(&session).await {
            Ok(snapshots) => log_info!(
                "Computed {} statistics snapshots for session {}",
                snapshots.len(),
                session.id
            ),
            Err(err) => log_error!("Statistics for session {} failed: {err:?}", session.id),
        }

        self.events.publish(PipelineEvent::AnalysisReady {
            session_id: session.id,
        });
    }

    /// Closes a drive still in progress as `Interrupted`. Used on shutdown;
    /// no statistics are computed for it.
    pub async fn finish(&mut self, at: DateTime<Utc>) {
        self.detector.reset();
        let Some(mut session) = self.open_session.take() else {
            return;
        };

        if let Err(err) = self
            .db
            .close_drive_session(&session.id, at, DriveSessionStatus::Interrupted)
            .await
        {
            log_error!("Failed to interrupt drive session {}: {err:?}", session.id);
        }
        session.end_time = Some(at);
        session.status = DriveSessionStatus::Interrupted;
        log_info!("Drive session {} interrupted by shutdown", session.id);
        self.events.publish(PipelineEvent::DriveEnded(session));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    use super::*;
    use crate::{clock::SystemClock, db::ParameterValue, statistics::StatisticsConfig};

    const TICK: Duration = Duration::from_secs(1);

    fn setup() -> (TempDir, Database, EventBus, DriveSessionController) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("drive.sqlite3")).unwrap();
        let events = EventBus::new();
        let statistics = StatisticsEngine::new(
            db.clone(),
            StatisticsConfig::default(),
            Arc::new(SystemClock),
            events.clone(),
        )
        .unwrap();
        let controller = DriveSessionController::new(
            DriveDetectorConfig {
                start_rpm: 1000.0,
                start_duration_secs: 3.0,
                end_rpm: 0.0,
                end_duration_secs: 2.0,
            },
            db.clone(),
            statistics,
            events.clone(),
        )
        .unwrap();
        (dir, db, events, controller)
    }

    fn batch(at: DateTime<Utc>, rpm: f64) -> ReadingBatch {
        let mut batch = ReadingBatch::new(at, "daily");
        batch.push("RPM", "rpm", Some(ParameterValue::Number(rpm)));
        batch.push("SPEED", "km/h", Some(ParameterValue::Number(rpm / 40.0)));
        batch
    }

    async fn drive(
        controller: &mut DriveSessionController,
        db: &Database,
        origin: DateTime<Utc>,
        rpms: &[f64],
    ) {
        for (i, rpm) in rpms.iter().enumerate() {
            let batch = batch(origin + ChronoDuration::seconds(i as i64), *rpm);
            controller.observe(&batch, TICK).await;
            db.insert_readings(&batch.to_readings()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn full_drive_opens_closes_and_analyses() {
        let (_dir, db, events, mut controller) = setup();
        let mut rx = events.subscribe();
        let origin = Utc::now();

        drive(
            &mut controller,
            &db,
            origin,
            &[1500.0, 1800.0, 2100.0, 2400.0, 1200.0, 0.0, 0.0],
        )
        .await;

        assert_eq!(controller.state(), DriveState::Idle);
        let sessions = db.list_drive_sessions(10, 0).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.status, DriveSessionStatus::Completed);
        assert_eq!(session.start_time.timestamp_millis(), origin.timestamp_millis());
        assert_eq!(
            session.end_time.map(|t| t.timestamp_millis()),
            Some((origin + ChronoDuration::seconds(5)).timestamp_millis())
        );

        let rpm_stats = db
            .get_latest_statistics("RPM", "daily")
            .await
            .unwrap()
            .expect("session statistics stored");
        assert_eq!(rpm_stats.max, 2400.0);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                PipelineEvent::DriveStarted(_) => "started",
                PipelineEvent::DriveEnded(_) => "ended",
                PipelineEvent::StatisticsAvailable(_) => "stats",
                PipelineEvent::AnalysisReady { .. } => "analysis",
                _ => "other",
            });
        }
        assert_eq!(kinds.first(), Some(&"started"));
        assert_eq!(kinds.get(1), Some(&"ended"));
        assert!(kinds.contains(&"stats"));
        assert_eq!(kinds.last(), Some(&"analysis"));
    }

    #[tokio::test]
    async fn finish_interrupts_open_drive() {
        let (_dir, db, _events, mut controller) = setup();
        let origin = Utc::now();

        drive(&mut controller, &db, origin, &[1500.0, 1500.0, 1500.0, 1500.0]).await;
        assert!(controller.open_session().is_some());

        controller.finish(origin + ChronoDuration::seconds(4)).await;

        assert!(controller.open_session().is_none());
        assert!(db.get_open_drive_session().await.unwrap().is_none());
        let sessions = db.list_drive_sessions(10, 0).await.unwrap();
        assert_eq!(sessions[0].status, DriveSessionStatus::Interrupted);
        assert!(db.get_latest_statistics("RPM", "daily").await.unwrap().is_none());
    }
}
