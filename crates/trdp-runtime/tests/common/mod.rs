//! Shared helpers for runtime integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use trdp_engine::{
    AppHandle, EngineError, Interval, PdEngine, PdInfo, PubHandle, PublishRequest, Readiness,
    SessionParams, SimEngine, SubHandle, SubscribeRequest,
};
use trdp_runtime::{ExchangeType, StackContext, TelegramConfig, TelegramEndpoint};

pub const HOST_A: &str = "127.0.0.1";
pub const HOST_B: &str = "127.0.0.2";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn telegram(com_id: u32, exchange_type: ExchangeType) -> TelegramConfig {
    TelegramConfig {
        com_id,
        exchange_type,
        ..TelegramConfig::default()
    }
}

pub fn telegram_between(com_id: u32, source: &str, destination: &str) -> TelegramConfig {
    TelegramConfig {
        com_id,
        sources: vec![TelegramEndpoint::host(source)],
        destinations: vec![TelegramEndpoint::host(destination)],
        ..TelegramConfig::default()
    }
}

pub fn sim_stack() -> (Arc<SimEngine>, Arc<StackContext>) {
    let engine = Arc::new(SimEngine::default());
    let stack = Arc::new(StackContext::new(engine.clone()));
    (engine, stack)
}

/// Which [`FaultEngine`] calls fail, and with what.
#[derive(Default)]
pub struct Faults {
    pub init: Mutex<Option<EngineError>>,
    pub publish: Mutex<Option<EngineError>>,
    pub put: Mutex<Option<EngineError>>,
    pub subscribe: Mutex<Option<EngineError>>,
    pub unsubscribe: Mutex<Option<EngineError>>,
    pub fail_process: AtomicBool,
}

/// Wraps a [`SimEngine`] and fails selected calls on demand.
pub struct FaultEngine {
    pub inner: SimEngine,
    pub faults: Faults,
    pub init_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
}

impl FaultEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SimEngine::default(),
            faults: Faults::default(),
            init_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
        })
    }

    pub fn fail(slot: &Mutex<Option<EngineError>>, err: Option<EngineError>) {
        *slot.lock().unwrap() = err;
    }

    fn check(slot: &Mutex<Option<EngineError>>) -> Result<(), EngineError> {
        match slot.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PdEngine for FaultEngine {
    fn init(&self) -> Result<(), EngineError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.faults.init)?;
        self.inner.init()
    }

    fn terminate(&self) -> Result<(), EngineError> {
        self.inner.terminate()
    }

    fn open_session(&self, params: &SessionParams) -> Result<AppHandle, EngineError> {
        self.inner.open_session(params)
    }

    fn close_session(&self, app: AppHandle) -> Result<(), EngineError> {
        self.inner.close_session(app)
    }

    fn update_session(&self, app: AppHandle) -> Result<(), EngineError> {
        self.inner.update_session(app)
    }

    fn publish(
        &self,
        app: AppHandle,
        request: &PublishRequest,
        data: &[u8],
    ) -> Result<PubHandle, EngineError> {
        Self::check(&self.faults.publish)?;
        self.inner.publish(app, request, data)
    }

    fn unpublish(&self, app: AppHandle, publication: PubHandle) -> Result<(), EngineError> {
        self.inner.unpublish(app, publication)
    }

    fn put(&self, app: AppHandle, publication: PubHandle, data: &[u8]) -> Result<(), EngineError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.faults.put)?;
        self.inner.put(app, publication, data)
    }

    fn subscribe(&self, app: AppHandle, request: &SubscribeRequest) -> Result<SubHandle, EngineError> {
        Self::check(&self.faults.subscribe)?;
        self.inner.subscribe(app, request)
    }

    fn unsubscribe(&self, app: AppHandle, subscription: SubHandle) -> Result<(), EngineError> {
        Self::check(&self.faults.unsubscribe)?;
        self.inner.unsubscribe(app, subscription)
    }

    fn get_interval(&self, app: AppHandle) -> Result<Interval, EngineError> {
        self.inner.get_interval(app)
    }

    fn select(&self, app: AppHandle, interval: &Interval) -> Result<Readiness, EngineError> {
        self.inner.select(app, interval)
    }

    fn process(&self, app: AppHandle, ready: &Readiness) -> Result<Vec<PdInfo>, EngineError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_process.load(Ordering::SeqCst) {
            return Err(EngineError::Io("socket gone".into()));
        }
        self.inner.process(app, ready)
    }
}
