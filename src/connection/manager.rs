//! Adapter lifecycle and retry policy.
//!
//! `connect()` makes one attempt per backoff entry and either ends
//! `Connected` or `Failed`; it never loops forever. Link loss detected by
//! the poller goes through `reconnect()`, which runs the same schedule from
//! `Reconnecting`. Every attempt, failure and disconnect is reported to the
//! telemetry sink.

use std::sync::{Arc, Mutex as StdMutex};

use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::DiagnosticAdapter,
    db::ParameterValue,
    error::{AdapterError, ConfigError, ConnectionError},
    telemetry::{TelemetryEvent, TelemetrySink},
};

use super::{ConnectionConfig, ConnectionState};

pub struct ConnectionManager {
    adapter: Mutex<Box<dyn DiagnosticAdapter>>,
    address: String,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    telemetry: Arc<dyn TelemetrySink>,
    shutdown: CancellationToken,
    /// Token of the retry cycle in progress, so `disconnect()` can interrupt it.
    active_cycle: StdMutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    pub fn new(
        adapter: Box<dyn DiagnosticAdapter>,
        address: impl Into<String>,
        config: ConnectionConfig,
        telemetry: Arc<dyn TelemetrySink>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            adapter: Mutex::new(adapter),
            address: address.into(),
            config,
            state_tx,
            telemetry,
            shutdown,
            active_cycle: StdMutex::new(None),
        })
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!("Connection state {} -> {}", previous.as_str(), next.as_str());
        }
    }

    /// Connects the adapter, retrying along the backoff schedule.
    ///
    /// Already connected is a no-op. From `Failed` the manager first resets
    /// to `Disconnected`, then starts a fresh schedule.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut adapter = self.adapter.lock().await;

        match self.current_state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed => self.set_state(ConnectionState::Disconnected),
            _ => {}
        }

        self.set_state(ConnectionState::Connecting);
        self.run_attempts(&mut **adapter).await
    }

    /// Re-establishes a link that failed while `Connected`.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        let mut adapter = self.adapter.lock().await;

        if self.current_state() == ConnectionState::Failed {
            return Err(ConnectionError::NotConnected);
        }

        self.set_state(ConnectionState::Reconnecting);
        if let Err(err) = adapter.disconnect().await {
            warn!("Error releasing broken adapter link: {err}");
        }
        self.run_attempts(&mut **adapter).await
    }

    /// Always succeeds and always ends `Disconnected`. Interrupts a retry
    /// cycle in progress.
    pub async fn disconnect(&self) {
        self.close_link(false).await;
    }

    /// Closes the adapter link for teardown. Same as [`Self::disconnect`]
    /// except that a `Failed` manager stays `Failed`; only `connect()` leaves it.
    pub async fn release(&self) {
        self.close_link(true).await;
    }

    async fn close_link(&self, keep_failed: bool) {
        if let Some(cycle) = self.lock_cycle().as_ref() {
            cycle.cancel();
        }

        let mut adapter = self.adapter.lock().await;
        let previous = self.current_state();
        if let Err(err) = adapter.disconnect().await {
            warn!("Adapter disconnect reported an error: {err}");
        }

        if keep_failed && previous == ConnectionState::Failed {
            return;
        }
        self.set_state(ConnectionState::Disconnected);

        if previous != ConnectionState::Disconnected {
            self.telemetry.record(TelemetryEvent::Disconnected);
        }
    }

    /// Reads one parameter. Fails with `Link` unless the manager is `Connected`.
    pub async fn query(&self, name: &str) -> Result<ParameterValue, AdapterError> {
        let mut adapter = self.adapter.lock().await;
        if self.current_state() != ConnectionState::Connected {
            return Err(AdapterError::Link("adapter is not connected".into()));
        }
        adapter.query_parameter(name).await
    }

    fn lock_cycle(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        match self.active_cycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run_attempts(
        &self,
        adapter: &mut dyn DiagnosticAdapter,
    ) -> Result<(), ConnectionError> {
        let cycle = self.shutdown.child_token();
        *self.lock_cycle() = Some(cycle.clone());

        let result = self.attempt_schedule(adapter, &cycle).await;

        *self.lock_cycle() = None;
        result
    }

    async fn attempt_schedule(
        &self,
        adapter: &mut dyn DiagnosticAdapter,
        cycle: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        let schedule = self.config.backoff();
        let attempt_timeout = self.config.attempt_timeout();
        let mut last_error = String::from("no attempt made");

        for (index, delay) in schedule.iter().enumerate() {
            let attempt = index as u32 + 1;

            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(*delay) => {}
                    _ = cycle.cancelled() => {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(ConnectionError::Cancelled);
                    }
                }
            }

            self.telemetry
                .record(TelemetryEvent::ConnectionAttempt { attempt });

            let outcome = tokio::select! {
                outcome = timeout(attempt_timeout, adapter.connect(&self.address)) => outcome,
                _ = cycle.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(ConnectionError::Cancelled);
                }
            };

            match outcome {
                Ok(Ok(())) => {
                    self.set_state(ConnectionState::Connected);
                    self.telemetry
                        .record(TelemetryEvent::ConnectionSucceeded { attempt });
                    return Ok(());
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("connect timed out after {attempt_timeout:?}"),
            }

            warn!(
                "Adapter connect attempt {attempt}/{} failed: {last_error}",
                schedule.len()
            );
            self.telemetry.record(TelemetryEvent::ConnectionAttemptFailed {
                attempt,
                error: last_error.clone(),
            });
        }

        self.set_state(ConnectionState::Failed);
        self.telemetry.record(TelemetryEvent::ConnectionFailed {
            attempts: schedule.len() as u32,
            error: last_error.clone(),
        });

        Err(ConnectionError::Exhausted {
            attempts: schedule.len(),
            last_error,
        })
    }
}
