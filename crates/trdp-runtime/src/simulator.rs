//! Runtime context driven by front ends: every session, every endpoint, and
//! the subscriber activity log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::endpoint::{EndpointId, EndpointRuntime, EndpointStatus};
use crate::model::{Dataset, SimulatorConfig};
use crate::session::{PdMessage, Session, SessionConfig, SessionId};
use crate::stack::StackContext;
use crate::{lock, RuntimeError};

/// Newest entries kept in the subscriber log.
pub const SUBSCRIBER_LOG_CAPACITY: usize = 50;

/// Payload bytes shown in a subscriber log entry.
const LOG_HEX_PREFIX: usize = 8;

/// One row of [`Simulator::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub id: EndpointId,
    pub interface: String,
    #[serde(flatten)]
    pub endpoint: EndpointStatus,
}

/// Owns the sessions and endpoints of one simulator run.
///
/// Endpoints are declared before sessions so that, even without an explicit
/// [`shutdown`](Self::shutdown), they drop (and stop publishing) first.
pub struct Simulator {
    endpoints: Vec<EndpointRuntime>,
    sessions: Vec<Session>,
    stack: Arc<StackContext>,
    config: SimulatorConfig,
    subscriber_log: Arc<Mutex<VecDeque<String>>>,
    shutdown_requested: AtomicBool,
}

impl Simulator {
    /// Open one session per interface and create one endpoint per telegram.
    ///
    /// Interfaces whose session fails to open are logged and skipped.
    pub fn start(config: &SimulatorConfig, stack: Arc<StackContext>) -> Self {
        let subscriber_log = Arc::new(Mutex::new(VecDeque::with_capacity(SUBSCRIBER_LOG_CAPACITY)));
        let mut sessions = Vec::new();
        let mut endpoints = Vec::new();

        for iface in &config.interfaces {
            let session = Session::new(SessionConfig::from_interface(iface), stack.clone());
            if let Err(err) = session.open() {
                tracing::error!(interface = %iface.name, "skipping interface: {err}");
                continue;
            }
            let session_id = SessionId(sessions.len());

            for telegram in &iface.telegrams {
                let endpoint = EndpointRuntime::new(telegram.clone(), session_id, &iface.host_ip);
                if endpoint.direction().can_receive() {
                    let log = subscriber_log.clone();
                    let interface = iface.name.clone();
                    endpoint.set_subscription_sink(move |message: &PdMessage| {
                        append_log(&log, format_log_entry(&interface, message));
                    });
                    if let Err(err) = endpoint.bind_receiver(&session) {
                        tracing::warn!(com_id = telegram.com_id, "receive binding failed: {err}");
                    }
                }
                endpoints.push(endpoint);
            }
            sessions.push(session);
        }

        tracing::info!(
            sessions = sessions.len(),
            endpoints = endpoints.len(),
            "simulator started"
        );
        Self {
            endpoints,
            sessions,
            stack,
            config: config.clone(),
            subscriber_log,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    fn lookup(&self, id: EndpointId) -> Result<(&EndpointRuntime, &Session), RuntimeError> {
        let endpoint = self
            .endpoints
            .get(id.0)
            .ok_or(RuntimeError::UnknownEndpoint(id.0))?;
        let session = self
            .sessions
            .get(endpoint.session_id().0)
            .ok_or(RuntimeError::UnknownEndpoint(id.0))?;
        Ok((endpoint, session))
    }

    pub fn start_publishing(&self, id: EndpointId, cycle: Duration) -> Result<(), RuntimeError> {
        let (endpoint, session) = self.lookup(id)?;
        endpoint.start_publishing(session, cycle)
    }

    /// Start every transmit-capable endpoint, at its configured cycle when it
    /// has one. Returns how many publishers are running afterwards.
    pub fn start_all(&self, default_cycle: Duration) -> usize {
        let mut started = 0;
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if !endpoint.direction().can_transmit() {
                continue;
            }
            let cycle = endpoint
                .config()
                .cycle_time_us
                .map(|us| Duration::from_micros(u64::from(us)))
                .unwrap_or(default_cycle);
            if self.start_publishing(EndpointId(index), cycle).is_ok() {
                started += 1;
            }
        }
        started
    }

    pub fn stop_publishing(&self, id: EndpointId) -> Result<(), RuntimeError> {
        self.endpoint(id)?.stop_publishing();
        Ok(())
    }

    pub fn set_fixed_payload(&self, id: EndpointId, payload: Vec<u8>) -> Result<(), RuntimeError> {
        self.endpoint(id)?.set_fixed_payload(payload);
        Ok(())
    }

    pub fn clear_fixed_payload(&self, id: EndpointId) -> Result<(), RuntimeError> {
        self.endpoint(id)?.clear_fixed_payload();
        Ok(())
    }

    pub fn set_tx_payload(&self, id: EndpointId, payload: Vec<u8>) -> Result<(), RuntimeError> {
        self.endpoint(id)?.set_tx_payload(payload);
        Ok(())
    }

    pub fn endpoints(&self) -> &[EndpointRuntime] {
        &self.endpoints
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn endpoint(&self, id: EndpointId) -> Result<&EndpointRuntime, RuntimeError> {
        self.endpoints
            .get(id.0)
            .ok_or(RuntimeError::UnknownEndpoint(id.0))
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id.0)
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stack(&self) -> &Arc<StackContext> {
        &self.stack
    }

    pub fn status(&self) -> Vec<StatusRow> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| StatusRow {
                id: EndpointId(index),
                interface: self
                    .session(endpoint.session_id())
                    .map(|session| session.name().to_string())
                    .unwrap_or_default(),
                endpoint: endpoint.status(),
            })
            .collect()
    }

    pub fn dataset_for(&self, com_id: u32) -> Option<&Dataset> {
        self.config.dataset_for_com_id(com_id)
    }

    /// Copy of the subscriber log, oldest first.
    pub fn subscriber_log(&self) -> Vec<String> {
        lock(&self.subscriber_log).iter().cloned().collect()
    }

    /// Stop every publisher, then close every session. Runs once.
    pub fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        for endpoint in &self.endpoints {
            endpoint.stop_publishing();
        }
        for session in &self.sessions {
            session.close();
        }
        tracing::info!("simulator shut down");
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn append_log(log: &Mutex<VecDeque<String>>, entry: String) {
    let mut log = lock(log);
    if log.len() == SUBSCRIBER_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

fn format_log_entry(interface: &str, message: &PdMessage) -> String {
    let shown = message.payload.len().min(LOG_HEX_PREFIX);
    let mut hex = hex::encode(&message.payload[..shown]);
    if message.payload.len() > shown {
        hex.push_str("..");
    }
    format!(
        "{} {} comId {}: {} bytes [{}]",
        message.timestamp.format("%H:%M:%S"),
        interface,
        message.com_id,
        message.payload.len(),
        hex
    )
}
