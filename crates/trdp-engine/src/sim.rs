use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::SimEngineConfig;
use crate::engine::{
    AppHandle, Interval, PdEngine, PdInfo, PubHandle, PublishRequest, Readiness, SessionParams,
    SocketId, SubHandle, SubscribeRequest,
};
use crate::EngineError;

/// In-process PD engine.
///
/// Sessions opened on the same `SimEngine` form one simulated network: a
/// publication is transmitted at its cycle interval during its owner's
/// `process` tick and queued in the inbox of every session subscribed to
/// the same com id on the matching destination address.
pub struct SimEngine {
    config: SimEngineConfig,
    bus: Mutex<Bus>,
}

#[derive(Default)]
struct Bus {
    initialized: bool,
    next_id: u32,
    sessions: HashMap<AppHandle, Arc<SimSession>>,
    publications: HashMap<PubHandle, Publication>,
    subscriptions: HashMap<SubHandle, Subscription>,
}

impl Bus {
    fn next_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn ensure_initialized(&self) -> Result<(), EngineError> {
        if self.initialized {
            Ok(())
        } else {
            Err(EngineError::NoInit)
        }
    }

    fn session(&self, app: AppHandle) -> Result<&Arc<SimSession>, EngineError> {
        self.ensure_initialized()?;
        self.sessions.get(&app).ok_or(EngineError::NoSession)
    }

    fn subscribed(&self, app: AppHandle, com_id: u32) -> bool {
        self.subscriptions
            .values()
            .any(|sub| sub.app == app && sub.request.com_id == com_id)
    }

    /// Sessions that should receive a frame, each listed once.
    fn receivers(&self, frame: &PdInfo) -> Vec<Arc<SimSession>> {
        let mut targets: Vec<Arc<SimSession>> = Vec::new();
        for sub in self.subscriptions.values() {
            if sub.request.com_id != frame.com_id {
                continue;
            }
            let accepts = sub.request.dest.is_unspecified()
                || sub.request.dest == frame.dest
                || frame.dest.is_multicast();
            if !accepts || targets.iter().any(|s| s.app == sub.app) {
                continue;
            }
            if let Some(session) = self.sessions.get(&sub.app) {
                targets.push(session.clone());
            }
        }
        targets
    }

    fn drop_session(&mut self, app: AppHandle) -> Option<Arc<SimSession>> {
        let session = self.sessions.remove(&app)?;
        self.publications.retain(|_, p| p.app != app);
        self.subscriptions.retain(|_, s| s.app != app);
        session.close();
        Some(session)
    }
}

struct SimSession {
    app: AppHandle,
    host: Ipv4Addr,
    socket: SocketId,
    inbox: Mutex<Inbox>,
    signal: Condvar,
}

#[derive(Default)]
struct Inbox {
    frames: VecDeque<PdInfo>,
    closed: bool,
}

impl SimSession {
    fn enqueue(&self, frame: PdInfo, capacity: usize) {
        let mut inbox = lock(&self.inbox);
        if inbox.closed {
            return;
        }
        if inbox.frames.len() >= capacity {
            inbox.frames.pop_front();
            tracing::debug!(app = %self.app, "sim inbox full, dropped oldest frame");
        }
        inbox.frames.push_back(frame);
        drop(inbox);
        self.signal.notify_all();
    }

    fn close(&self) {
        let mut inbox = lock(&self.inbox);
        inbox.closed = true;
        inbox.frames.clear();
        drop(inbox);
        self.signal.notify_all();
    }
}

struct Publication {
    app: AppHandle,
    request: PublishRequest,
    interval: Duration,
    next_due: Instant,
    data: Vec<u8>,
}

struct Subscription {
    app: AppHandle,
    request: SubscribeRequest,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new(SimEngineConfig::new())
    }
}

impl SimEngine {
    pub fn new(config: SimEngineConfig) -> Self {
        Self {
            config,
            bus: Mutex::new(Bus::default()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.bus).initialized
    }

    /// Number of currently open sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.bus).sessions.len()
    }

    /// Number of active publications across all sessions.
    pub fn publication_count(&self) -> usize {
        lock(&self.bus).publications.len()
    }

    /// Number of active subscriptions across all sessions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.bus).subscriptions.len()
    }

    /// Current buffer of a publication, if it exists.
    pub fn published_data(&self, publication: PubHandle) -> Option<Vec<u8>> {
        lock(&self.bus)
            .publications
            .get(&publication)
            .map(|p| p.data.clone())
    }

    fn check_payload(&self, data: &[u8]) -> Result<(), EngineError> {
        if data.len() > self.config.max_payload {
            return Err(EngineError::Param(format!(
                "payload of {} bytes exceeds maximum of {}",
                data.len(),
                self.config.max_payload
            )));
        }
        Ok(())
    }
}

impl PdEngine for SimEngine {
    fn init(&self) -> Result<(), EngineError> {
        let mut bus = lock(&self.bus);
        if bus.initialized {
            tracing::debug!("sim engine already initialized");
        }
        bus.initialized = true;
        Ok(())
    }

    fn terminate(&self) -> Result<(), EngineError> {
        let mut bus = lock(&self.bus);
        bus.ensure_initialized()?;
        let apps: Vec<AppHandle> = bus.sessions.keys().copied().collect();
        for app in apps {
            bus.drop_session(app);
        }
        bus.initialized = false;
        Ok(())
    }

    fn open_session(&self, params: &SessionParams) -> Result<AppHandle, EngineError> {
        let mut bus = lock(&self.bus);
        bus.ensure_initialized()?;
        let app = AppHandle(bus.next_id());
        let socket = SocketId(bus.next_id());
        bus.sessions.insert(
            app,
            Arc::new(SimSession {
                app,
                host: params.host,
                socket,
                inbox: Mutex::new(Inbox::default()),
                signal: Condvar::new(),
            }),
        );
        tracing::debug!(%app, host = %params.host, "sim session opened");
        Ok(app)
    }

    fn close_session(&self, app: AppHandle) -> Result<(), EngineError> {
        let mut bus = lock(&self.bus);
        bus.ensure_initialized()?;
        bus.drop_session(app)
            .map(|_| ())
            .ok_or(EngineError::NoSession)
    }

    fn update_session(&self, app: AppHandle) -> Result<(), EngineError> {
        lock(&self.bus).session(app).map(|_| ())
    }

    fn publish(
        &self,
        app: AppHandle,
        request: &PublishRequest,
        data: &[u8],
    ) -> Result<PubHandle, EngineError> {
        self.check_payload(data)?;
        if request.com_id == 0 {
            return Err(EngineError::ComId(0));
        }
        let mut bus = lock(&self.bus);
        bus.session(app)?;
        let handle = PubHandle(bus.next_id());
        let interval = Duration::from_micros(u64::from(request.interval_us.max(1)));
        bus.publications.insert(
            handle,
            Publication {
                app,
                request: request.clone(),
                interval,
                next_due: Instant::now(),
                data: data.to_vec(),
            },
        );
        Ok(handle)
    }

    fn unpublish(&self, app: AppHandle, publication: PubHandle) -> Result<(), EngineError> {
        let mut bus = lock(&self.bus);
        bus.session(app)?;
        let owned = bus
            .publications
            .get(&publication)
            .is_some_and(|p| p.app == app);
        if !owned {
            return Err(EngineError::NoPub);
        }
        bus.publications.remove(&publication);
        Ok(())
    }

    fn put(&self, app: AppHandle, publication: PubHandle, data: &[u8]) -> Result<(), EngineError> {
        self.check_payload(data)?;
        let mut bus = lock(&self.bus);
        bus.session(app)?;
        match bus.publications.get_mut(&publication) {
            Some(p) if p.app == app => {
                p.data.clear();
                p.data.extend_from_slice(data);
                Ok(())
            }
            _ => Err(EngineError::NoPub),
        }
    }

    fn subscribe(
        &self,
        app: AppHandle,
        request: &SubscribeRequest,
    ) -> Result<SubHandle, EngineError> {
        if request.com_id == 0 {
            return Err(EngineError::ComId(0));
        }
        let mut bus = lock(&self.bus);
        bus.session(app)?;
        let handle = SubHandle(bus.next_id());
        bus.subscriptions.insert(
            handle,
            Subscription {
                app,
                request: request.clone(),
            },
        );
        Ok(handle)
    }

    fn unsubscribe(&self, app: AppHandle, subscription: SubHandle) -> Result<(), EngineError> {
        let mut bus = lock(&self.bus);
        bus.session(app)?;
        let owned = bus
            .subscriptions
            .get(&subscription)
            .is_some_and(|s| s.app == app);
        if !owned {
            return Err(EngineError::NoSub);
        }
        bus.subscriptions.remove(&subscription);
        Ok(())
    }

    fn get_interval(&self, app: AppHandle) -> Result<Interval, EngineError> {
        let bus = lock(&self.bus);
        let session = bus.session(app)?;
        let now = Instant::now();
        let until_due = bus
            .publications
            .values()
            .filter(|p| p.app == app)
            .map(|p| p.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(self.config.process_cycle);
        Ok(Interval {
            timeout: until_due.min(self.config.process_cycle),
            sockets: vec![session.socket],
        })
    }

    fn select(&self, app: AppHandle, interval: &Interval) -> Result<Readiness, EngineError> {
        let session = lock(&self.bus).session(app)?.clone();
        let inbox = lock(&session.inbox);
        let (inbox, _) = session
            .signal
            .wait_timeout_while(inbox, interval.timeout, |inbox| {
                inbox.frames.is_empty() && !inbox.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if inbox.closed {
            return Err(EngineError::NoSession);
        }
        let mut readiness = Readiness::default();
        if !inbox.frames.is_empty() && interval.sockets.contains(&session.socket) {
            readiness.ready.push(session.socket);
        }
        Ok(readiness)
    }

    fn process(&self, app: AppHandle, _ready: &Readiness) -> Result<Vec<PdInfo>, EngineError> {
        let mut bus = lock(&self.bus);
        let session = bus.session(app)?.clone();
        let now = Instant::now();

        let mut outgoing = Vec::new();
        for publication in bus.publications.values_mut() {
            if publication.app != app || publication.next_due > now {
                continue;
            }
            outgoing.push(PdInfo {
                com_id: publication.request.com_id,
                src: publication.request.src,
                dest: publication.request.dest,
                data: publication.data.clone(),
                result: None,
            });
            let next = publication.next_due + publication.interval;
            publication.next_due = if next <= now {
                now + publication.interval
            } else {
                next
            };
        }
        for frame in outgoing {
            for target in bus.receivers(&frame) {
                target.enqueue(frame.clone(), self.config.inbox_capacity);
            }
        }

        let queued: Vec<PdInfo> = lock(&session.inbox).frames.drain(..).collect();
        let delivered = queued
            .into_iter()
            .filter(|frame| bus.subscribed(app, frame.com_id))
            .collect::<Vec<_>>();
        if !delivered.is_empty() {
            tracing::trace!(
                %app,
                host = %session.host,
                count = delivered.len(),
                "sim delivered frames"
            );
        }
        Ok(delivered)
    }
}
