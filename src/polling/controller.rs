use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{PollOutcome, Poller};

/// Owns the spawned poll loop.
pub struct PollerController {
    handle: Option<JoinHandle<PollOutcome>>,
    cancel_token: Option<CancellationToken>,
}

impl PollerController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn start(
        &mut self,
        poller: Poller,
        default_interval: Duration,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("poller already active");
        }

        self.cancel_token = Some(poller.cancel_token());
        self.handle = Some(tokio::spawn(poller.run(default_interval, end_time)));
        info!("Poller started (default interval {default_interval:?})");
        Ok(())
    }

    /// Waits for the loop to end on its own. Safe to use in `select!`: the
    /// handle is only released once the loop has finished.
    pub async fn wait(&mut self) -> Result<Option<PollOutcome>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };

        let joined = handle.await;
        self.handle = None;
        self.cancel_token = None;
        let outcome = joined.context("poll loop task failed to join")?;
        Ok(Some(outcome))
    }

    /// Stops the loop after its current tick and waits for it to wind down.
    pub async fn stop(&mut self) -> Result<Option<PollOutcome>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .context("poll loop task failed to join")
                .map(Some),
            None => Ok(None),
        }
    }
}

impl Default for PollerController {
    fn default() -> Self {
        Self::new()
    }
}
