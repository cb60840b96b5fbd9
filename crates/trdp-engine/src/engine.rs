use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::EngineError;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Raw numeric value (for logging).
            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

handle_type!(
    /// Opaque handle of an opened engine session.
    AppHandle,
    "app"
);
handle_type!(
    /// Opaque handle of an active publication.
    PubHandle,
    "pub"
);
handle_type!(
    /// Opaque handle of an active subscription.
    SubHandle,
    "sub"
);
handle_type!(
    /// A descriptor the engine wants the caller to watch for readiness.
    SocketId,
    "sock"
);

/// Transmission flags for publish/subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PdFlags(u8);

impl PdFlags {
    pub const DEFAULT: PdFlags = PdFlags(0);
    /// Deliver received telegrams through `process` results.
    pub const CALLBACK: PdFlags = PdFlags(0x01);

    pub fn contains(&self, other: PdFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// What a subscription does with its buffer when the sender goes silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutBehavior {
    #[default]
    SetToZero,
    KeepLastValue,
}

/// Parameters for opening an engine session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub host: Ipv4Addr,
    pub leader: Ipv4Addr,
    pub network_id: u8,
    /// Host name as configured (informational).
    pub host_name: String,
    pub process_cycle: Duration,
}

/// Parameters for a cyclic PD publication.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub com_id: u32,
    pub service_id: u32,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    /// Transmission interval in microseconds (at least 1).
    pub interval_us: u32,
    pub flags: PdFlags,
}

/// Parameters for a PD subscription.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub com_id: u32,
    /// Destination address the subscriber listens on; unspecified accepts any.
    pub dest: Ipv4Addr,
    pub flags: PdFlags,
    pub timeout_us: u32,
    pub timeout_behavior: TimeoutBehavior,
}

/// The next wake-up an engine session asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub timeout: Duration,
    pub sockets: Vec<SocketId>,
}

/// Descriptors that became ready during a `select`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub ready: Vec<SocketId>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

/// A PD telegram delivered by a `process` tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdInfo {
    pub com_id: u32,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub data: Vec<u8>,
    /// Reception result reported by the engine (`None` when clean).
    pub result: Option<EngineError>,
}

/// The process-data engine contract consumed by the runtime.
///
/// All calls are synchronous. `select` may block, but never longer than the
/// interval it is given. Implementations must tolerate concurrent calls on
/// the same session from the processing thread and publisher threads.
///
/// Received telegrams are returned from [`PdEngine::process`] rather than
/// pushed through a registered callback.
pub trait PdEngine: Send + Sync {
    /// Global initialisation. Must precede every other call.
    fn init(&self) -> Result<(), EngineError>;

    /// Global teardown. Releases every remaining session.
    fn terminate(&self) -> Result<(), EngineError>;

    fn open_session(&self, params: &SessionParams) -> Result<AppHandle, EngineError>;

    fn close_session(&self, app: AppHandle) -> Result<(), EngineError>;

    /// Recompute internal socket bookkeeping after publish/subscribe changes.
    fn update_session(&self, app: AppHandle) -> Result<(), EngineError>;

    fn publish(
        &self,
        app: AppHandle,
        request: &PublishRequest,
        data: &[u8],
    ) -> Result<PubHandle, EngineError>;

    fn unpublish(&self, app: AppHandle, publication: PubHandle) -> Result<(), EngineError>;

    /// Replace the buffer of a publication. Never blocks.
    fn put(&self, app: AppHandle, publication: PubHandle, data: &[u8]) -> Result<(), EngineError>;

    fn subscribe(
        &self,
        app: AppHandle,
        request: &SubscribeRequest,
    ) -> Result<SubHandle, EngineError>;

    fn unsubscribe(&self, app: AppHandle, subscription: SubHandle) -> Result<(), EngineError>;

    /// When the session next needs processing and which descriptors to watch.
    fn get_interval(&self, app: AppHandle) -> Result<Interval, EngineError>;

    /// Block until a watched descriptor is ready or `interval.timeout` elapses.
    fn select(&self, app: AppHandle, interval: &Interval) -> Result<Readiness, EngineError>;

    /// One processing tick: transmit due telegrams, return received ones.
    fn process(&self, app: AppHandle, ready: &Readiness) -> Result<Vec<PdInfo>, EngineError>;
}
