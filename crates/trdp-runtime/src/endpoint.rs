//! Per-telegram publisher/subscriber state machine.
//!
//! An [`EndpointRuntime`] is created once per configured telegram and bound
//! to the [`Session`] of its interface by [`SessionId`]. It never holds the
//! session itself: operations that need the engine handle take the session
//! by reference, and a running publisher keeps only the engine and the
//! copied application handle.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use trdp_engine::{AppHandle, PdEngine, PdFlags, PubHandle, PublishRequest};
use trdp_metrics::{Counter, Stamp};

use crate::config::parse_ipv4;
use crate::model::{ExchangeType, TelegramConfig, TelegramEndpoint};
use crate::session::{PdMessage, Session, SessionId};
use crate::{lock, RuntimeError};

/// Shortest timer period a publisher will run at.
pub const MIN_PUBLISH_PERIOD: Duration = Duration::from_millis(1);

/// Index of an endpoint inside the simulator's endpoint arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EndpointId(pub usize);

/// Inferred role of the local host for a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PdDirection {
    Outgoing,
    Incoming,
    Loopback,
    Unknown,
}

impl PdDirection {
    pub fn can_transmit(&self) -> bool {
        matches!(self, PdDirection::Outgoing | PdDirection::Loopback)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, PdDirection::Incoming | PdDirection::Loopback)
    }
}

impl fmt::Display for PdDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PdDirection::Outgoing => "Outgoing",
            PdDirection::Incoming => "Incoming",
            PdDirection::Loopback => "Loopback",
            PdDirection::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Classify `telegram` from the point of view of `host_ip`.
///
/// An explicit host match on the source or destination lists decides the
/// direction. Only when the host appears in neither list does the
/// exchange-type tag (and the create-endpoint flag for sources) apply.
pub fn classify_direction(host_ip: &str, telegram: &TelegramConfig) -> PdDirection {
    let host = host_ip.trim();
    let matches_host = |uri: &str| {
        let uri = uri.trim();
        !host.is_empty() && !uri.is_empty() && uri == host
    };

    let src_match = telegram.sources.iter().any(|ep| matches_host(&ep.uri_host));
    let dst_match = telegram
        .destinations
        .iter()
        .any(|ep| matches_host(&ep.uri_host));
    let no_match = !src_match && !dst_match;

    let is_source = src_match
        || (no_match
            && (matches!(
                telegram.exchange_type,
                ExchangeType::Source | ExchangeType::SourceSink
            ) || telegram.create_endpoint));
    let is_sink = dst_match
        || (no_match
            && matches!(
                telegram.exchange_type,
                ExchangeType::Sink | ExchangeType::SourceSink
            ));

    match (is_source, is_sink) {
        (true, true) => PdDirection::Loopback,
        (true, false) => PdDirection::Outgoing,
        (false, true) => PdDirection::Incoming,
        (false, false) => PdDirection::Unknown,
    }
}

/// Observer of telegrams received by one endpoint.
pub type SubscriptionSink = Arc<dyn Fn(&PdMessage) + Send + Sync>;

/// Point-in-time view of an endpoint, as shown by front ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub com_id: u32,
    pub name: String,
    pub host_ip: String,
    pub direction: PdDirection,
    pub running: bool,
    pub publish_count: u64,
    pub last_publish: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_receive: Option<DateTime<Utc>>,
    pub tx_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_size: Option<usize>,
    pub fixed_payload_size: Option<usize>,
}

struct EndpointShared {
    com_id: u32,
    running: AtomicBool,
    publish_count: Counter,
    receive_count: Counter,
    last_publish: Stamp,
    last_receive: Stamp,
    buffers: Mutex<Buffers>,
}

#[derive(Default)]
struct Buffers {
    tx_payload: Vec<u8>,
    rx_payload: Vec<u8>,
    last_published: Vec<u8>,
    fixed_payload: Option<Vec<u8>>,
    sink: Option<SubscriptionSink>,
}

/// A live publication and the timer thread feeding it.
struct Publisher {
    engine: Arc<dyn PdEngine>,
    app: AppHandle,
    handle: PubHandle,
    dest: Ipv4Addr,
    /// Dropping the sender wakes and ends the timer thread.
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Hand the publication back to the engine. The timer thread must be
    /// gone already.
    fn release(self, com_id: u32) {
        if let Err(err) = self.engine.unpublish(self.app, self.handle) {
            tracing::warn!(com_id, code = err.code(), "failed to unpublish PD: {err}");
        }
        if let Err(err) = self.engine.update_session(self.app) {
            tracing::debug!(
                com_id,
                code = err.code(),
                "session update after unpublish failed: {err}"
            );
        }
        tracing::info!(com_id, "stopping PD publisher");
    }
}

/// Holds the running publisher, if any. Shared with its timer thread so the
/// thread can release the publication when the engine ends the loop.
type PublisherSlot = Arc<Mutex<Option<Publisher>>>;

pub struct EndpointRuntime {
    config: TelegramConfig,
    session: SessionId,
    host_ip: String,
    direction: PdDirection,
    shared: Arc<EndpointShared>,
    publisher: PublisherSlot,
}

impl EndpointRuntime {
    /// Create the runtime for `config` on the session `session` whose host
    /// address is `host_ip`. The direction is fixed here.
    pub fn new(config: TelegramConfig, session: SessionId, host_ip: impl Into<String>) -> Self {
        let host_ip = host_ip.into();
        let direction = classify_direction(&host_ip, &config);
        tracing::debug!(com_id = config.com_id, %direction, host = %host_ip, "created PD endpoint");
        Self {
            shared: Arc::new(EndpointShared {
                com_id: config.com_id,
                running: AtomicBool::new(false),
                publish_count: Counter::new(),
                receive_count: Counter::new(),
                last_publish: Stamp::new(),
                last_receive: Stamp::new(),
                buffers: Mutex::new(Buffers::default()),
            }),
            config,
            session,
            host_ip,
            direction,
            publisher: Arc::new(Mutex::new(None)),
        }
    }

    /// Route telegrams for this endpoint's com id from `session` into
    /// [`handle_subscription`](Self::handle_subscription).
    pub fn bind_receiver(&self, session: &Session) -> Result<(), RuntimeError> {
        let weak: Weak<EndpointShared> = Arc::downgrade(&self.shared);
        session.register_pd_subscriber(self.config.com_id, move |message| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_subscription(message);
            }
        })
    }

    /// Start (or restart) the periodic publisher with the given cycle.
    pub fn start_publishing(&self, session: &Session, cycle: Duration) -> Result<(), RuntimeError> {
        let com_id = self.config.com_id;
        let mut publisher = lock(&self.publisher);
        self.stop_locked(&mut publisher);

        let app = match (session.is_open(), session.app_handle()) {
            (true, Some(app)) => app,
            _ => {
                tracing::warn!(com_id, "cannot start PD publisher without an open TRDP session");
                return Err(RuntimeError::NotOpen);
            }
        };
        if !self.direction.can_transmit() {
            tracing::warn!(
                com_id,
                direction = %self.direction,
                "PD publish not permitted for this direction"
            );
            return Err(RuntimeError::TransmitNotPermitted {
                com_id,
                direction: self.direction,
            });
        }

        let dest = self.resolve_destination(session).inspect_err(|err| {
            tracing::error!(com_id, "cannot resolve PD destination: {err}");
        })?;

        self.shared.publish_count.reset();
        self.shared.last_publish.clear();
        let initial = self.shared.next_payload(0);

        let engine = session.engine();
        let request = PublishRequest {
            com_id,
            service_id: self.config.service_id,
            src: session.host_address(),
            dest,
            interval_us: cycle.as_micros().clamp(1, u32::MAX as u128) as u32,
            flags: PdFlags::DEFAULT,
        };
        let handle = match engine.publish(app, &request, &initial) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(com_id, code = err.code(), "failed to publish PD: {err}");
                return Err(err.into());
            }
        };
        if let Err(err) = engine.update_session(app) {
            tracing::warn!(com_id, code = err.code(), "session update after publish failed: {err}");
        }
        self.shared.record_publish(initial);
        self.shared.running.store(true, Ordering::Release);

        let period = cycle.max(MIN_PUBLISH_PERIOD);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let timer = Timer {
            shared: self.shared.clone(),
            slot: self.publisher.clone(),
            engine: engine.clone(),
            app,
            handle,
            period,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("pd-publish-{com_id}"))
            .spawn(move || timer.run(stop_rx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(com_id, "failed to start PD timer thread: {err}");
                self.shared.running.store(false, Ordering::Release);
                if let Err(unpub) = engine.unpublish(app, handle) {
                    tracing::warn!(com_id, code = unpub.code(), "unpublish failed: {unpub}");
                }
                return Err(RuntimeError::Thread(err));
            }
        };

        *publisher = Some(Publisher {
            engine,
            app,
            handle,
            dest,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
        tracing::info!(
            com_id,
            dest = %dest,
            "starting PD publisher every {} ms",
            cycle.as_millis()
        );
        Ok(())
    }

    /// Stop the publisher. No-op when nothing is running.
    pub fn stop_publishing(&self) {
        let mut publisher = lock(&self.publisher);
        self.stop_locked(&mut publisher);
    }

    fn stop_locked(&self, slot: &mut Option<Publisher>) {
        let Some(mut publisher) = slot.take() else {
            return;
        };
        let com_id = self.config.com_id;

        // Dropping the sender also releases a timer thread waiting for the
        // slot lock in `Timer::release_own_slot`.
        drop(publisher.stop_tx.take());
        if let Some(thread) = publisher.thread.take() {
            if thread.join().is_err() {
                tracing::error!(com_id, "PD timer thread panicked");
            }
        }
        self.shared.running.store(false, Ordering::Release);
        publisher.release(com_id);
    }

    /// First non-empty destination host, else first non-empty source host,
    /// else the session's own address.
    fn resolve_destination(&self, session: &Session) -> Result<Ipv4Addr, RuntimeError> {
        match first_host(&self.config.destinations).or_else(|| first_host(&self.config.sources)) {
            Some(host) => parse_ipv4(host),
            None => Ok(session.host_address()),
        }
    }

    /// Record a telegram delivered for this endpoint's com id.
    pub fn handle_subscription(&self, message: &PdMessage) {
        self.shared.handle_subscription(message);
    }

    /// Observe every telegram this endpoint receives.
    pub fn set_subscription_sink<F>(&self, sink: F)
    where
        F: Fn(&PdMessage) + Send + Sync + 'static,
    {
        lock(&self.shared.buffers).sink = Some(Arc::new(sink));
    }

    pub fn set_fixed_payload(&self, payload: Vec<u8>) {
        lock(&self.shared.buffers).fixed_payload = Some(payload);
    }

    pub fn clear_fixed_payload(&self) {
        lock(&self.shared.buffers).fixed_payload = None;
    }

    pub fn has_fixed_payload(&self) -> bool {
        lock(&self.shared.buffers).fixed_payload.is_some()
    }

    pub fn fixed_payload_size(&self) -> Option<usize> {
        lock(&self.shared.buffers).fixed_payload.as_ref().map(Vec::len)
    }

    pub fn set_tx_payload(&self, payload: Vec<u8>) {
        lock(&self.shared.buffers).tx_payload = payload;
    }

    pub fn tx_payload(&self) -> Vec<u8> {
        lock(&self.shared.buffers).tx_payload.clone()
    }

    pub fn rx_payload(&self) -> Vec<u8> {
        lock(&self.shared.buffers).rx_payload.clone()
    }

    /// Bytes handed to the engine by the most recent publish.
    pub fn last_published_payload(&self) -> Vec<u8> {
        lock(&self.shared.buffers).last_published.clone()
    }

    pub fn is_publishing(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn publish_count(&self) -> u64 {
        self.shared.publish_count.get()
    }

    pub fn receive_count(&self) -> u64 {
        self.shared.receive_count.get()
    }

    pub fn last_publish_time(&self) -> Option<DateTime<Utc>> {
        self.shared.last_publish.get()
    }

    pub fn last_receive_time(&self) -> Option<DateTime<Utc>> {
        self.shared.last_receive.get()
    }

    pub fn direction(&self) -> PdDirection {
        self.direction
    }

    pub fn com_id(&self) -> u32 {
        self.config.com_id
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }

    /// Destination of the running publication.
    pub fn destination(&self) -> Option<Ipv4Addr> {
        lock(&self.publisher).as_ref().map(|publisher| publisher.dest)
    }

    pub fn status(&self) -> EndpointStatus {
        let receives = self.direction.can_receive();
        let (tx_size, rx_size, fixed_payload_size) = {
            let buffers = lock(&self.shared.buffers);
            (
                buffers.tx_payload.len(),
                buffers.rx_payload.len(),
                buffers.fixed_payload.as_ref().map(Vec::len),
            )
        };
        EndpointStatus {
            com_id: self.config.com_id,
            name: self.config.name.clone(),
            host_ip: self.host_ip.clone(),
            direction: self.direction,
            running: self.is_publishing(),
            publish_count: self.publish_count(),
            last_publish: self.last_publish_time(),
            receive_count: receives.then(|| self.receive_count()),
            last_receive: if receives { self.last_receive_time() } else { None },
            tx_size,
            rx_size: receives.then_some(rx_size),
            fixed_payload_size,
        }
    }
}

impl Drop for EndpointRuntime {
    fn drop(&mut self) {
        self.stop_publishing();
    }
}

impl fmt::Debug for EndpointRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRuntime")
            .field("com_id", &self.config.com_id)
            .field("session", &self.session)
            .field("direction", &self.direction)
            .field("running", &self.is_publishing())
            .finish()
    }
}

impl EndpointShared {
    /// Fixed override, then a non-empty transmit payload, then the counter.
    fn next_payload(&self, count: u64) -> Vec<u8> {
        let buffers = lock(&self.buffers);
        if let Some(fixed) = &buffers.fixed_payload {
            return fixed.clone();
        }
        if !buffers.tx_payload.is_empty() {
            return buffers.tx_payload.clone();
        }
        count.to_le_bytes().to_vec()
    }

    fn record_publish(&self, payload: Vec<u8>) {
        lock(&self.buffers).last_published = payload;
        self.publish_count.inc();
        self.last_publish.record_now();
    }

    fn handle_subscription(&self, message: &PdMessage) {
        tracing::debug!(
            com_id = message.com_id,
            "received PD telegram ({} bytes)",
            message.payload.len()
        );
        let sink = {
            let mut buffers = lock(&self.buffers);
            buffers.rx_payload = message.payload.clone();
            self.receive_count.inc();
            self.last_receive.record(message.timestamp);
            buffers.sink.clone()
        };
        if let Some(sink) = sink {
            sink(message);
        }
    }
}

fn first_host(endpoints: &[TelegramEndpoint]) -> Option<&str> {
    endpoints
        .iter()
        .map(|ep| ep.uri_host.trim())
        .find(|host| !host.is_empty())
}

/// Everything a publisher's timer thread needs.
struct Timer {
    shared: Arc<EndpointShared>,
    slot: PublisherSlot,
    engine: Arc<dyn PdEngine>,
    app: AppHandle,
    handle: PubHandle,
    period: Duration,
}

impl Timer {
    /// Push a fresh payload every `period` until stopped or the engine
    /// becomes unavailable.
    fn run(self, stop_rx: Receiver<()>) {
        let com_id = self.shared.com_id;
        let mut next = Instant::now() + self.period;
        loop {
            match stop_rx.recv_deadline(next) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            let payload = self.shared.next_payload(self.shared.publish_count.get());
            match self.engine.put(self.app, self.handle, &payload) {
                Ok(()) => self.shared.record_publish(payload),
                Err(err) if err.is_fatal() => {
                    tracing::error!(
                        com_id,
                        code = err.code(),
                        "PD publisher stopped, engine unavailable: {err}"
                    );
                    self.release_own_slot(&stop_rx);
                    break;
                }
                Err(err) => {
                    tracing::warn!(com_id, code = err.code(), "PD put failed: {err}");
                }
            }

            next += self.period;
            let now = Instant::now();
            while next <= now {
                next += self.period;
            }
        }
        tracing::debug!(com_id, "PD timer thread exited");
    }

    /// Clear the slot and release the publication after a fatal engine error.
    ///
    /// A concurrent stop holds the slot lock while joining this thread and
    /// drops the stop sender first; seeing the disconnect means that stop
    /// does the cleanup instead.
    fn release_own_slot(&self, stop_rx: &Receiver<()>) {
        let mut slot = loop {
            match self.slot.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => match stop_rx.recv_timeout(MIN_PUBLISH_PERIOD) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                },
            }
        };

        if !slot.as_ref().is_some_and(|publisher| publisher.handle == self.handle) {
            return;
        }
        if let Some(mut publisher) = slot.take() {
            self.shared.running.store(false, Ordering::Release);
            publisher.stop_tx = None;
            // Our own join handle; dropping it detaches the exiting thread.
            publisher.thread = None;
            publisher.release(self.shared.com_id);
        }
    }
}
