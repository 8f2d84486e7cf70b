//! Events exposed to consumers outside the pipeline (display, alert UI,
//! post-drive analysis, reporting).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    db::{Anomaly, DriveSession, StatisticsSnapshot},
    polling::ReadingBatch,
};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PipelineEvent {
    Batch(Arc<ReadingBatch>),
    DriveStarted(DriveSession),
    DriveEnded(DriveSession),
    /// The drive is closed and its statistics are stored; post-drive
    /// analysis may start.
    AnalysisReady { session_id: String },
    Anomaly(Anomaly),
    StatisticsAvailable(StatisticsSnapshot),
}

/// Broadcast fan-out. Slow subscribers lag and lose old events; the
/// pipeline itself never waits on them.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        // An error only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
