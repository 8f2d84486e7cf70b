//! Fire-and-forget observability sink for connection and cleanup events.
//!
//! `record` must never block or fail the caller: the connection manager
//! and retention manager call it from their hot paths.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::db::{ConnectionLogEntry, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TelemetryEvent {
    ConnectionAttempt { attempt: u32 },
    ConnectionSucceeded { attempt: u32 },
    ConnectionAttemptFailed { attempt: u32, error: String },
    ConnectionFailed { attempts: u32, error: String },
    Disconnected,
    CleanupCompleted { rows_removed: u64, success: bool, duration_ms: u64 },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::ConnectionAttempt { .. } => "attempt",
            TelemetryEvent::ConnectionSucceeded { .. } => "success",
            TelemetryEvent::ConnectionAttemptFailed { .. } => "attempt_failed",
            TelemetryEvent::ConnectionFailed { .. } => "failure",
            TelemetryEvent::Disconnected => "disconnect",
            TelemetryEvent::CleanupCompleted { .. } => "cleanup",
        }
    }

    fn attempt(&self) -> Option<u32> {
        match self {
            TelemetryEvent::ConnectionAttempt { attempt }
            | TelemetryEvent::ConnectionSucceeded { attempt }
            | TelemetryEvent::ConnectionAttemptFailed { attempt, .. } => Some(*attempt),
            TelemetryEvent::ConnectionFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            TelemetryEvent::ConnectionAttemptFailed { error, .. }
            | TelemetryEvent::ConnectionFailed { error, .. } => Some(error.clone()),
            TelemetryEvent::CleanupCompleted {
                rows_removed,
                success,
                duration_ms,
            } => Some(format!(
                "removed={rows_removed} success={success} duration_ms={duration_ms}"
            )),
            _ => None,
        }
    }

    pub fn is_connection_event(&self) -> bool {
        !matches!(self, TelemetryEvent::CleanupCompleted { .. })
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ConnectionAttemptFailed { .. } | TelemetryEvent::ConnectionFailed { .. } => {
                warn!("telemetry: {event:?}")
            }
            _ => info!("telemetry: {event:?}"),
        }
    }
}

/// Persists connection events to `connection_log` from a background task.
///
/// `record` only pushes onto an unbounded channel; the writer task drains it.
/// The task ends when every clone of the sink is dropped.
#[derive(Clone)]
pub struct DatabaseSink {
    sender: mpsc::UnboundedSender<(DateTime<Utc>, TelemetryEvent)>,
}

impl DatabaseSink {
    pub fn spawn(db: Database) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(DateTime<Utc>, TelemetryEvent)>();

        tokio::spawn(async move {
            while let Some((timestamp, event)) = receiver.recv().await {
                LogSink.record(event.clone());
                if !event.is_connection_event() {
                    continue;
                }

                let entry = ConnectionLogEntry {
                    id: None,
                    timestamp,
                    event_type: event.kind().to_string(),
                    attempt: event.attempt(),
                    detail: event.detail(),
                };
                if let Err(err) = db.insert_connection_event(&entry).await {
                    warn!("Failed to persist connection event: {err:?}");
                }
            }
        });

        Self { sender }
    }
}

impl TelemetrySink for DatabaseSink {
    fn record(&self, event: TelemetryEvent) {
        if self.sender.send((Utc::now(), event)).is_err() {
            warn!("Telemetry writer has stopped; dropping event");
        }
    }
}
