//! TRDP process-data engine layer.
//!
//! Defines the [`PdEngine`] contract the runtime drives (session
//! open/close, publish/put/unpublish, subscribe/unsubscribe, interval,
//! select and process ticks) and ships [`SimEngine`], an in-process engine
//! that routes PD telegrams between the sessions it hosts.
//!
//! # Quick start
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//! use trdp_engine::{
//!     PdEngine, PdFlags, PublishRequest, Readiness, SessionParams, SimEngine,
//!     SubscribeRequest, TimeoutBehavior,
//! };
//!
//! # fn example() -> Result<(), trdp_engine::EngineError> {
//! let engine = SimEngine::default();
//! engine.init()?;
//!
//! let app = engine.open_session(&SessionParams {
//!     host: Ipv4Addr::LOCALHOST,
//!     leader: Ipv4Addr::UNSPECIFIED,
//!     network_id: 0,
//!     host_name: "127.0.0.1".into(),
//!     process_cycle: Duration::from_millis(10),
//! })?;
//!
//! engine.subscribe(app, &SubscribeRequest {
//!     com_id: 1000,
//!     dest: Ipv4Addr::LOCALHOST,
//!     flags: PdFlags::CALLBACK,
//!     timeout_us: 0,
//!     timeout_behavior: TimeoutBehavior::SetToZero,
//! })?;
//! engine.publish(app, &PublishRequest {
//!     com_id: 1000,
//!     service_id: 0,
//!     src: Ipv4Addr::LOCALHOST,
//!     dest: Ipv4Addr::LOCALHOST,
//!     interval_us: 100_000,
//!     flags: PdFlags::DEFAULT,
//! }, b"hello")?;
//!
//! let delivered = engine.process(app, &Readiness::default())?;
//! assert_eq!(delivered[0].data, b"hello");
//!
//! engine.close_session(app)?;
//! engine.terminate()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod config;
mod engine;
mod error;
mod sim;

pub use config::{SimEngineConfig, DEFAULT_PROCESS_CYCLE, MAX_PD_DATA_SIZE};
pub use engine::{
    AppHandle, Interval, PdEngine, PdFlags, PdInfo, PubHandle, PublishRequest, Readiness,
    SessionParams, SocketId, SubHandle, SubscribeRequest, TimeoutBehavior,
};
pub use error::EngineError;
pub use sim::SimEngine;
