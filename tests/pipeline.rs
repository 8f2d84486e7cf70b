use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tempfile::TempDir;
use tokio::{sync::broadcast, time::timeout};

use drivelog_lib::{
    adapter::{PARAMETERS, VIN_PARAMETER},
    clock::SystemClock,
    config::AppConfig,
    connection::{ConnectionConfig, ConnectionState},
    db::{Database, DriveSession, DriveSessionStatus, ParameterValue, Reading},
    drive::DriveDetectorConfig,
    error::{ConfigError, ConnectionError},
    events::{EventBus, PipelineEvent},
    pipeline::{Pipeline, PipelineDeps},
    polling::PollingConfig,
    testing::{CountingDecoder, RecordingSink, ScriptedAdapter},
};

const VIN: &str = "1HGCM82633A004352";

fn config(dir: &TempDir) -> AppConfig {
    AppConfig {
        database_path: dir.path().join("drivelog.sqlite3"),
        connection: ConnectionConfig {
            backoff_secs: vec![0.0, 0.01],
            attempt_timeout_secs: 1.0,
        },
        polling: PollingConfig {
            default_interval_secs: 0.02,
            parameter_timeout_ms: 500,
        },
        drive: DriveDetectorConfig {
            start_rpm: 1000.0,
            start_duration_secs: 0.1,
            end_rpm: 0.0,
            end_duration_secs: 0.1,
        },
        ..AppConfig::default()
    }
}

fn adapter() -> ScriptedAdapter {
    let adapter = ScriptedAdapter::new();
    for spec in PARAMETERS {
        adapter.set_value(spec.name, Ok(ParameterValue::Number(20.0)));
    }
    adapter.set_value(VIN_PARAMETER, Ok(ParameterValue::Text(VIN.into())));
    adapter
}

struct Started {
    pipeline: Pipeline,
    sink: RecordingSink,
    decoder: CountingDecoder,
    rx: broadcast::Receiver<PipelineEvent>,
}

async fn start(config: &AppConfig, db: &Database, adapter: &ScriptedAdapter) -> anyhow::Result<Started> {
    let sink = RecordingSink::new();
    let decoder = CountingDecoder::succeeding();
    let events = EventBus::new();
    let rx = events.subscribe();

    let pipeline = Pipeline::start(
        config,
        db.clone(),
        PipelineDeps {
            adapter: Box::new(adapter.clone()),
            decoder: Arc::new(decoder.clone()),
            telemetry: Arc::new(sink.clone()),
            clock: Arc::new(SystemClock),
            events,
        },
        None,
    )
    .await?;

    Ok(Started {
        pipeline,
        sink,
        decoder,
        rx,
    })
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<PipelineEvent>, mut matches: F) -> PipelineEvent
where
    F: FnMut(&PipelineEvent) -> bool,
{
    timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

#[tokio::test]
async fn drive_cycle_produces_session_statistics_and_analysis_signal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let db = Database::new(config.database_path.clone()).unwrap();

    let adapter = adapter();
    adapter.push_values("RPM", std::iter::repeat(Ok(ParameterValue::Number(0.0))).take(3));
    adapter.push_values("RPM", std::iter::repeat(Ok(ParameterValue::Number(2200.0))).take(20));
    adapter.set_value("RPM", Ok(ParameterValue::Number(0.0)));

    let mut started = start(&config, &db, &adapter).await.unwrap();

    let started_session = match wait_for(&mut started.rx, |e| matches!(e, PipelineEvent::DriveStarted(_))).await {
        PipelineEvent::DriveStarted(session) => session,
        other => panic!("unexpected event {other:?}"),
    };
    let ready = wait_for(&mut started.rx, |e| matches!(e, PipelineEvent::AnalysisReady { .. })).await;
    assert!(matches!(ready, PipelineEvent::AnalysisReady { ref session_id } if *session_id == started_session.id));

    started.pipeline.shutdown().await.unwrap();

    let session = db.get_drive_session(&started_session.id).await.unwrap().unwrap();
    assert_eq!(session.status, DriveSessionStatus::Completed);
    assert!(session.end_time.unwrap() > session.start_time);

    let rpm = db
        .get_latest_statistics("RPM", &config.default_profile_id)
        .await
        .unwrap()
        .expect("RPM statistics for the drive");
    assert_eq!(rpm.max, 2200.0);

    assert_eq!(adapter.connect_attempts().len(), 1);
    assert!(!adapter.is_connected());
    assert_eq!(started.decoder.calls(), 1);
    let kinds: Vec<_> = started.sink.events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["attempt", "success", "disconnect"]);
}

#[tokio::test]
async fn crashed_session_is_recovered_and_shutdown_interrupts_drive() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let db = Database::new(config.database_path.clone()).unwrap();

    let crash_start = Utc::now() - chrono::Duration::hours(2);
    db.insert_drive_session(&DriveSession {
        id: "crashed".into(),
        start_time: crash_start,
        end_time: None,
        profile_id: "daily".into(),
        status: DriveSessionStatus::Open,
    })
    .await
    .unwrap();
    db.insert_readings(&[Reading {
        id: None,
        timestamp: crash_start + chrono::Duration::minutes(30),
        parameter: "RPM".into(),
        value: Some(ParameterValue::Number(1800.0)),
        unit: "rpm".into(),
        profile_id: "daily".into(),
    }])
    .await
    .unwrap();

    let adapter = adapter();
    adapter.set_value("RPM", Ok(ParameterValue::Number(2500.0)));
    let mut started = start(&config, &db, &adapter).await.unwrap();

    let crashed = db.get_drive_session("crashed").await.unwrap().unwrap();
    assert_eq!(crashed.status, DriveSessionStatus::Interrupted);
    assert_eq!(
        crashed.end_time.map(|t| t.timestamp_millis()),
        Some((crash_start + chrono::Duration::minutes(30)).timestamp_millis())
    );

    wait_for(&mut started.rx, |e| matches!(e, PipelineEvent::DriveStarted(_))).await;
    started.pipeline.shutdown().await.unwrap();

    assert!(db.get_open_drive_session().await.unwrap().is_none());
    let latest = &db.list_drive_sessions(1, 0).await.unwrap()[0];
    assert_eq!(latest.status, DriveSessionStatus::Interrupted);
    assert_ne!(latest.id, "crashed");
}

#[tokio::test]
async fn unreachable_adapter_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let db = Database::new(config.database_path.clone()).unwrap();
    let adapter = adapter();
    adapter.fail_connects(2);

    let err = start(&config, &db, &adapter).await.err().expect("start should fail");

    assert!(matches!(
        err.downcast_ref::<ConnectionError>(),
        Some(ConnectionError::Exhausted { attempts: 2, .. })
    ));
    assert_eq!(adapter.connect_attempts().len(), 2);
}

#[tokio::test]
async fn invalid_configuration_stops_before_touching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config.drive.end_rpm = 5000.0;
    let db = Database::new(config.database_path.clone()).unwrap();
    db.insert_drive_session(&DriveSession {
        id: "open".into(),
        start_time: Utc::now(),
        end_time: None,
        profile_id: "daily".into(),
        status: DriveSessionStatus::Open,
    })
    .await
    .unwrap();
    let adapter = adapter();

    let err = start(&config, &db, &adapter).await.err().expect("start should fail");

    assert!(err.downcast_ref::<ConfigError>().is_some());
    assert!(adapter.connect_attempts().is_empty());
    assert!(db.get_open_drive_session().await.unwrap().is_some());
}

#[tokio::test]
async fn lost_link_that_cannot_recover_ends_failed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let db = Database::new(config.database_path.clone()).unwrap();
    let adapter = adapter();
    let mut started = start(&config, &db, &adapter).await.unwrap();

    adapter.fail_connects(2);
    adapter.drop_link();

    let outcome = timeout(Duration::from_secs(10), started.pipeline.wait())
        .await
        .expect("poller should stop")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.reason, drivelog_lib::polling::StopReason::ConnectionFailed);
    let connection = started.pipeline.connection().clone();
    assert_eq!(connection.current_state(), ConnectionState::Failed);
    started.pipeline.shutdown().await.unwrap();
    assert_eq!(connection.current_state(), ConnectionState::Failed);

    let kinds: Vec<_> = started.sink.events().iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&"failure"));
    assert_eq!(kinds.last(), Some(&"failure"));
}
