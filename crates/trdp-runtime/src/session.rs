//! One opened engine session plus its background processing thread.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use trdp_engine::{
    AppHandle, EngineError, Interval, PdEngine, PdFlags, PdInfo, SessionParams, SubHandle,
    SubscribeRequest, TimeoutBehavior, DEFAULT_PROCESS_CYCLE,
};

use crate::config::parse_ipv4;
use crate::model::InterfaceConfig;
use crate::stack::StackContext;
use crate::{lock, RuntimeError};

/// Default PD supervision timeout handed to the engine on subscribe (100 ms).
pub const DEFAULT_PD_TIMEOUT_US: u32 = 100_000;

/// Index of a session inside the simulator's session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub usize);

/// Addresses and identity of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    pub host_ip: String,
    /// Empty means "no leader" (unspecified address).
    pub leader_ip: String,
    pub network_id: u8,
    /// Fallback wait when the engine cannot report an interval.
    pub process_cycle: Duration,
}

impl SessionConfig {
    pub fn new(host_ip: impl Into<String>) -> Self {
        let host_ip = host_ip.into();
        Self {
            name: host_ip.clone(),
            host_ip,
            leader_ip: String::new(),
            network_id: 0,
            process_cycle: DEFAULT_PROCESS_CYCLE,
        }
    }

    pub fn from_interface(iface: &InterfaceConfig) -> Self {
        Self {
            name: iface.name.clone(),
            host_ip: iface.host_ip.clone(),
            leader_ip: iface.leader_ip.clone(),
            network_id: iface.network_id,
            process_cycle: DEFAULT_PROCESS_CYCLE,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn leader_ip(mut self, leader_ip: impl Into<String>) -> Self {
        self.leader_ip = leader_ip.into();
        self
    }

    pub fn network_id(mut self, network_id: u8) -> Self {
        self.network_id = network_id;
        self
    }
}

/// A PD telegram delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdMessage {
    pub com_id: u32,
    pub src_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of delivered telegrams. Invoked on the session's processing thread.
pub type PdCallback = Arc<dyn Fn(&PdMessage) + Send + Sync>;

/// One registry entry for a com id.
#[derive(Clone)]
enum Subscriber {
    Callback(PdCallback),
    /// Dropped from the registry once its receiver is gone.
    Channel(Sender<PdMessage>),
}

/// An engine session bound to a host/leader address pair.
///
/// `open` starts a dedicated thread that loops over interval → select →
/// process and hands received telegrams to the callbacks registered for
/// their com id. `close` stops and joins that thread before releasing any
/// engine state; it is idempotent and also runs on drop.
pub struct Session {
    config: SessionConfig,
    stack: Arc<StackContext>,
    shared: Arc<SessionShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct SessionShared {
    running: AtomicBool,
    state: Mutex<SessionState>,
}

struct SessionState {
    open: bool,
    app: Option<AppHandle>,
    host_addr: Ipv4Addr,
    leader_addr: Ipv4Addr,
    callbacks: HashMap<u32, Vec<Subscriber>>,
    subscriptions: HashMap<u32, SubHandle>,
}

impl Session {
    pub fn new(config: SessionConfig, stack: Arc<StackContext>) -> Self {
        Self {
            config,
            stack,
            shared: Arc::new(SessionShared {
                running: AtomicBool::new(false),
                state: Mutex::new(SessionState {
                    open: false,
                    app: None,
                    host_addr: Ipv4Addr::UNSPECIFIED,
                    leader_addr: Ipv4Addr::UNSPECIFIED,
                    callbacks: HashMap::new(),
                    subscriptions: HashMap::new(),
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Open the engine session and start the processing thread.
    ///
    /// Opening an already open session is a no-op.
    pub fn open(&self) -> Result<(), RuntimeError> {
        let mut state = lock(&self.shared.state);
        if state.open {
            tracing::warn!(
                session = %self.config.name,
                "session already open; skipping reinitialization"
            );
            return Ok(());
        }

        let host = parse_ipv4(&self.config.host_ip).inspect_err(|err| {
            tracing::error!(session = %self.config.name, "cannot open session: host {err}");
        })?;
        let leader = if self.config.leader_ip.trim().is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            parse_ipv4(&self.config.leader_ip).inspect_err(|err| {
                tracing::error!(session = %self.config.name, "cannot open session: leader {err}");
            })?
        };

        self.stack.acquire()?;
        let engine = self.stack.engine();
        let params = SessionParams {
            host,
            leader,
            network_id: self.config.network_id,
            host_name: self.config.host_ip.clone(),
            process_cycle: self.config.process_cycle,
        };
        let app = match engine.open_session(&params) {
            Ok(app) => app,
            Err(err) => {
                tracing::error!(
                    session = %self.config.name,
                    code = err.code(),
                    "failed to open TRDP session: {err}"
                );
                self.stack.abandon();
                return Err(err.into());
            }
        };

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let thread_engine = engine.clone();
        let fallback = self.config.process_cycle;
        let spawned = std::thread::Builder::new()
            .name(format!("pd-session-{}", self.config.host_ip))
            .spawn(move || process_loop(shared, thread_engine, app, fallback));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(
                    session = %self.config.name,
                    "failed to start processing thread: {err}"
                );
                self.shared.running.store(false, Ordering::Release);
                if let Err(close_err) = engine.close_session(app) {
                    tracing::warn!(
                        code = close_err.code(),
                        "close after failed start: {close_err}"
                    );
                }
                self.stack.release();
                return Err(RuntimeError::Thread(err));
            }
        };
        *lock(&self.worker) = Some(handle);

        state.app = Some(app);
        state.host_addr = host;
        state.leader_addr = leader;
        state.open = true;
        tracing::info!(
            session = %self.config.name,
            "opened TRDP session on host {} (leader {}, network {})",
            self.config.host_ip,
            leader,
            self.config.network_id
        );
        Ok(())
    }

    /// Stop the processing thread, drop every subscription, release the
    /// engine session. Safe to call repeatedly or on a never-opened session.
    pub fn close(&self) {
        let app = {
            let mut state = lock(&self.shared.state);
            if !state.open {
                return;
            }
            state.open = false;
            self.shared.running.store(false, Ordering::Release);
            state.app.take()
        };

        if let Some(handle) = lock(&self.worker).take() {
            if handle.join().is_err() {
                tracing::error!(session = %self.config.name, "processing thread panicked");
            }
        }

        let engine = self.stack.engine();
        let subscriptions: Vec<(u32, SubHandle)> = {
            let mut state = lock(&self.shared.state);
            state.callbacks.clear();
            state.subscriptions.drain().collect()
        };

        if let Some(app) = app {
            for (com_id, subscription) in subscriptions {
                if let Err(err) = engine.unsubscribe(app, subscription) {
                    tracing::warn!(
                        com_id,
                        code = err.code(),
                        "unsubscribe during close failed: {err}"
                    );
                }
            }
            if let Err(err) = engine.close_session(app) {
                tracing::error!(code = err.code(), "failed to close TRDP session: {err}");
            }
        }

        self.stack.release();
        tracing::info!(session = %self.config.name, "closed TRDP session");
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared.state).open
    }

    /// Register a receiver for `com_id`.
    ///
    /// Several callbacks may share one com id; the engine subscription is
    /// created once per com id. A failing engine subscribe is logged and the
    /// callback is kept.
    pub fn register_pd_subscriber<F>(&self, com_id: u32, callback: F) -> Result<(), RuntimeError>
    where
        F: Fn(&PdMessage) + Send + Sync + 'static,
    {
        self.register(com_id, Subscriber::Callback(Arc::new(callback)))
    }

    /// Channel-backed subscriber: every telegram for `com_id` is queued on
    /// the returned receiver. Dropping the receiver unregisters it on the
    /// next delivery for that com id.
    pub fn subscribe_channel(&self, com_id: u32) -> Result<Receiver<PdMessage>, RuntimeError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.register(com_id, Subscriber::Channel(tx))?;
        Ok(rx)
    }

    fn register(&self, com_id: u32, subscriber: Subscriber) -> Result<(), RuntimeError> {
        let mut state = lock(&self.shared.state);
        let app = match (state.open, state.app) {
            (true, Some(app)) => app,
            _ => {
                tracing::warn!(com_id, "session not open; cannot register PD subscriber");
                return Err(RuntimeError::NotOpen);
            }
        };

        state
            .callbacks
            .entry(com_id)
            .or_default()
            .push(subscriber);

        if state.subscriptions.contains_key(&com_id) {
            return Ok(());
        }

        let engine = self.stack.engine();
        let request = SubscribeRequest {
            com_id,
            dest: state.host_addr,
            flags: PdFlags::CALLBACK,
            timeout_us: DEFAULT_PD_TIMEOUT_US,
            timeout_behavior: TimeoutBehavior::SetToZero,
        };
        match engine.subscribe(app, &request) {
            Ok(subscription) => {
                state.subscriptions.insert(com_id, subscription);
                tracing::debug!(com_id, "subscribed for PD");
                if let Err(err) = engine.update_session(app) {
                    tracing::warn!(
                        com_id,
                        code = err.code(),
                        "session update after subscribe failed: {err}"
                    );
                }
            }
            Err(err) => {
                tracing::error!(com_id, code = err.code(), "failed to subscribe PD: {err}");
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn host_ip(&self) -> &str {
        &self.config.host_ip
    }

    /// Resolved host address (unspecified until opened).
    pub fn host_address(&self) -> Ipv4Addr {
        lock(&self.shared.state).host_addr
    }

    pub fn leader_address(&self) -> Ipv4Addr {
        lock(&self.shared.state).leader_addr
    }

    pub fn app_handle(&self) -> Option<AppHandle> {
        lock(&self.shared.state).app
    }

    pub fn engine(&self) -> Arc<dyn PdEngine> {
        self.stack.engine()
    }

    /// Com ids with a live engine subscription, ascending.
    pub fn subscribed_com_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = lock(&self.shared.state)
            .subscriptions
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn callback_count(&self, com_id: u32) -> usize {
        lock(&self.shared.state)
            .callbacks
            .get(&com_id)
            .map_or(0, Vec::len)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionShared {
    fn deliver(&self, info: PdInfo) {
        if let Some(err) = &info.result {
            tracing::warn!(
                com_id = info.com_id,
                code = err.code(),
                "PD reception reported error: {err}"
            );
        }

        let subscribers: Vec<Subscriber> = lock(&self.state)
            .callbacks
            .get(&info.com_id)
            .cloned()
            .unwrap_or_default();
        if subscribers.is_empty() {
            tracing::warn!(com_id = info.com_id, "no PD subscribers registered for com id");
            return;
        }

        let message = PdMessage {
            com_id: info.com_id,
            src_addr: info.src,
            dest_addr: info.dest,
            payload: info.data,
            timestamp: Utc::now(),
        };
        let mut closed = Vec::new();
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Callback(callback) => callback(&message),
                Subscriber::Channel(tx) => {
                    if tx.send(message.clone()).is_err() {
                        closed.push(tx);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.drop_channels(info.com_id, &closed);
        }
    }

    fn drop_channels(&self, com_id: u32, closed: &[Sender<PdMessage>]) {
        let mut state = lock(&self.state);
        if let Some(subscribers) = state.callbacks.get_mut(&com_id) {
            subscribers.retain(|subscriber| match subscriber {
                Subscriber::Channel(tx) => !closed.iter().any(|dead| dead.same_channel(tx)),
                Subscriber::Callback(_) => true,
            });
        }
        tracing::debug!(
            com_id,
            dropped = closed.len(),
            "removed PD channel subscribers without a receiver"
        );
    }
}

/// Warns once per distinct engine error code, then stays at debug level.
#[derive(Default)]
struct ErrorGate {
    last: Option<i32>,
}

impl ErrorGate {
    fn report(&mut self, app: AppHandle, stage: &str, err: &EngineError) {
        if self.last == Some(err.code()) {
            tracing::debug!(%app, code = err.code(), "{stage} still failing: {err}");
        } else {
            tracing::warn!(%app, code = err.code(), "{stage} reported error: {err}");
            self.last = Some(err.code());
        }
    }

    fn clear(&mut self) {
        self.last = None;
    }
}

/// Body of the processing thread. Runs until `running` is cleared.
fn process_loop(
    shared: Arc<SessionShared>,
    engine: Arc<dyn PdEngine>,
    app: AppHandle,
    fallback: Duration,
) {
    let mut errors = ErrorGate::default();

    while shared.running.load(Ordering::Acquire) {
        let interval = engine.get_interval(app).unwrap_or_else(|err| {
            errors.report(app, "get_interval", &err);
            Interval {
                timeout: fallback,
                sockets: Vec::new(),
            }
        });

        let ready = match engine.select(app, &interval) {
            Ok(ready) => ready,
            Err(err) => {
                errors.report(app, "select", &err);
                std::thread::sleep(interval.timeout);
                continue;
            }
        };

        match engine.process(app, &ready) {
            Ok(delivered) => {
                errors.clear();
                for info in delivered {
                    shared.deliver(info);
                }
            }
            Err(err) => errors.report(app, "process", &err),
        }
    }
    tracing::debug!(%app, "processing thread stopped");
}
