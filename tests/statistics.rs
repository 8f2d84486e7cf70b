use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use drivelog_lib::{
    clock::ManualClock,
    db::{Database, DriveSession, DriveSessionStatus, ParameterValue, Profile, Reading},
    error::StatisticsError,
    events::EventBus,
    retention::{scheduler::StatisticsRecomputeJob, ScheduledJob},
    statistics::{StatisticsConfig, StatisticsEngine},
};

fn readings(profile: &str, parameter: &str, start: DateTime<Utc>, values: &[f64]) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| Reading {
            id: None,
            timestamp: start + Duration::seconds(i as i64),
            parameter: parameter.into(),
            value: Some(ParameterValue::Number(*value)),
            unit: "".into(),
            profile_id: profile.into(),
        })
        .collect()
}

fn engine(db: &Database, config: StatisticsConfig, now: DateTime<Utc>) -> StatisticsEngine {
    StatisticsEngine::new(db.clone(), config, Arc::new(ManualClock::new(now)), EventBus::new()).unwrap()
}

#[tokio::test]
async fn outlier_bounds_are_exactly_mean_plus_minus_k_sigma() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("stats.sqlite3")).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let series: [&[f64]; 4] = [
        &[90.0, 91.5, 89.0, 130.0, 90.5],
        &[0.0, 0.0],
        &[-12.5, 3.25, 7.0, 7.0, 7.0, 44.0, -2.0],
        &[800.0, 2400.0, 3100.0, 650.0],
    ];

    for (i, values) in series.iter().enumerate() {
        let parameter = format!("P{i}");
        db.insert_readings(&readings("daily", &parameter, start, values))
            .await
            .unwrap();

        for k in [1.0, 2.0, 3.0] {
            let config = StatisticsConfig {
                outlier_k: k,
                ..StatisticsConfig::default()
            };
            let snapshot = engine(&db, config, start)
                .calculate(&parameter, "daily", start, start + Duration::hours(1))
                .await
                .unwrap();

            assert!(snapshot.std_1 >= 0.0);
            assert_eq!(snapshot.std_2, 2.0 * snapshot.std_1);
            assert_eq!(snapshot.outlier_min, snapshot.avg - k * snapshot.std_1);
            assert_eq!(snapshot.outlier_max, snapshot.avg + k * snapshot.std_1);
            assert_eq!(snapshot.sample_count, values.len() as u64);
        }
    }
}

#[tokio::test]
async fn underpopulated_window_fails_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("stats.sqlite3")).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    db.insert_readings(&readings("daily", "RPM", start, &[900.0]))
        .await
        .unwrap();
    let engine = engine(&db, StatisticsConfig::default(), start);

    let single = engine
        .calculate("RPM", "daily", start, start + Duration::hours(1))
        .await;
    assert!(matches!(
        single,
        Err(StatisticsError::InsufficientData { found: 1, required: 2, .. })
    ));

    let empty = engine
        .calculate("SPEED", "daily", start, start + Duration::hours(1))
        .await;
    assert!(matches!(empty, Err(StatisticsError::InsufficientData { found: 0, .. })));

    assert!(db.list_statistics("RPM", "daily").await.unwrap().is_empty());
}

#[tokio::test]
async fn recompute_replaces_only_its_own_date() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("stats.sqlite3")).unwrap();
    let day_one = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let day_two = day_one + Duration::days(1);
    db.insert_readings(&readings("daily", "RPM", day_one, &[1000.0, 2000.0]))
        .await
        .unwrap();
    db.insert_readings(&readings("daily", "RPM", day_two, &[3000.0, 3000.0, 4000.0]))
        .await
        .unwrap();
    let engine = engine(&db, StatisticsConfig::default(), day_two);

    let first = engine
        .calculate("RPM", "daily", day_one, day_one + Duration::hours(1))
        .await
        .unwrap();
    engine
        .calculate("RPM", "daily", day_two, day_two + Duration::hours(1))
        .await
        .unwrap();
    let widened = engine
        .calculate("RPM", "daily", day_one - Duration::hours(1), day_two + Duration::hours(1))
        .await
        .unwrap();

    let history = db.list_statistics("RPM", "daily").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], first);
    assert_eq!(history[1], widened);
    assert_eq!(history[1].sample_count, 5);
    assert_eq!(history[1].mode, 3000.0);
}

#[tokio::test]
async fn profile_comparison_diffs_latest_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("stats.sqlite3")).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let end = start + Duration::hours(1);
    db.insert_readings(&readings("daily", "SPEED", start, &[40.0, 60.0]))
        .await
        .unwrap();
    db.insert_readings(&readings("track", "SPEED", start, &[120.0, 180.0]))
        .await
        .unwrap();
    let engine = engine(&db, StatisticsConfig::default(), end);
    engine.calculate("SPEED", "daily", start, end).await.unwrap();
    engine.calculate("SPEED", "track", start, end).await.unwrap();

    let profiles = vec!["daily".to_string(), "track".to_string(), "eco".to_string()];
    let comparison = engine.compare_profiles("SPEED", &profiles).await.unwrap();

    assert_eq!(comparison.len(), 3);
    assert!(comparison[0].delta.is_none());
    let track = comparison[1].delta.as_ref().unwrap();
    assert_eq!(track.avg, 100.0);
    assert_eq!(track.max, 120.0);
    assert_eq!(track.sample_count, 0);
    assert!(comparison[2].snapshot.is_none());
    assert!(comparison[2].delta.is_none());
}

#[tokio::test]
async fn daily_job_finalizes_yesterday_and_keeps_todays_drive() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("stats.sqlite3")).unwrap();
    db.upsert_profile(&Profile::new("daily", "Daily")).await.unwrap();
    db.set_active_profile("daily").await.unwrap();

    let yesterday = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let drive_start = Utc.with_ymd_and_hms(2024, 5, 2, 1, 0, 0).unwrap();
    db.insert_readings(&readings("daily", "RPM", yesterday + Duration::hours(8), &[1000.0, 2000.0]))
        .await
        .unwrap();
    db.insert_readings(&readings(
        "daily",
        "RPM",
        yesterday + Duration::days(1) - Duration::seconds(1),
        &[1500.0],
    ))
    .await
    .unwrap();
    db.insert_readings(&readings("daily", "RPM", drive_start, &[3000.0, 3500.0]))
        .await
        .unwrap();

    let engine = engine(&db, StatisticsConfig::default(), drive_start + Duration::hours(2));
    let session = DriveSession {
        id: "drive".into(),
        start_time: drive_start,
        end_time: Some(drive_start + Duration::seconds(1)),
        profile_id: "daily".into(),
        status: DriveSessionStatus::Completed,
    };
    let from_drive = engine.calculate_session(&session).await.unwrap();
    assert_eq!(from_drive.len(), 1);

    StatisticsRecomputeJob {
        engine: engine.clone(),
        db: db.clone(),
    }
    .run()
    .await;

    let history = db.list_statistics("RPM", "daily").await.unwrap();
    assert_eq!(history.len(), 2);

    let finalized = &history[0];
    assert_eq!(finalized.analysis_date, yesterday.date_naive());
    assert_eq!(finalized.sample_count, 3);
    assert_eq!(finalized.window_start, yesterday);
    assert_eq!(
        finalized.window_end,
        yesterday + Duration::days(1) - Duration::milliseconds(1)
    );

    assert_eq!(history[1], from_drive[0]);
    assert_eq!(history[1].window_start, drive_start);
}
