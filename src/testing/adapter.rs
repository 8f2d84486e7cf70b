//! Adapter that replays scripted connect outcomes and parameter values.
//!
//! Clones share state, so a caller can hand one clone to the pipeline and
//! keep another to script behaviour and inspect calls.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{adapter::DiagnosticAdapter, db::ParameterValue, error::AdapterError};

#[derive(Default)]
struct ScriptState {
    connect_results: VecDeque<Result<(), AdapterError>>,
    queued: HashMap<String, VecDeque<Result<ParameterValue, AdapterError>>>,
    sticky: HashMap<String, Result<ParameterValue, AdapterError>>,
    connected: bool,
    connect_attempts: Vec<Instant>,
    disconnects: usize,
    queries: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues the outcome of the next connect call. Unscripted connects succeed.
    pub fn push_connect(&self, result: Result<(), AdapterError>) -> &Self {
        self.lock().connect_results.push_back(result);
        self
    }

    pub fn fail_connects(&self, times: usize) -> &Self {
        for attempt in 0..times {
            self.push_connect(Err(AdapterError::Link(format!("scripted failure {}", attempt + 1))));
        }
        self
    }

    /// Value returned whenever no queued value is pending for `name`.
    pub fn set_value(&self, name: &str, value: Result<ParameterValue, AdapterError>) -> &Self {
        self.lock().sticky.insert(name.to_string(), value);
        self
    }

    pub fn push_values<I>(&self, name: &str, values: I) -> &Self
    where
        I: IntoIterator<Item = Result<ParameterValue, AdapterError>>,
    {
        self.lock()
            .queued
            .entry(name.to_string())
            .or_default()
            .extend(values);
        self
    }

    /// Drops the link as if the cable was pulled; next queries fail with `Link`.
    pub fn drop_link(&self) {
        self.lock().connected = false;
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().connect_attempts.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn query_count(&self, name: &str) -> usize {
        self.lock().queries.iter().filter(|q| q.as_str() == name).count()
    }
}

#[async_trait]
impl DiagnosticAdapter for ScriptedAdapter {
    async fn connect(&mut self, _address: &str) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.connect_attempts.push(Instant::now());
        let result = state.connect_results.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    async fn query_parameter(&mut self, name: &str) -> Result<ParameterValue, AdapterError> {
        let mut state = self.lock();
        state.queries.push(name.to_string());
        if !state.connected {
            return Err(AdapterError::Link("adapter not connected".into()));
        }

        if let Some(next) = state.queued.get_mut(name).and_then(VecDeque::pop_front) {
            return next;
        }

        state
            .sticky
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(AdapterError::Unsupported(name.to_string())))
    }
}
