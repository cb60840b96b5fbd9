//! TRDP PD simulator runtime.
//!
//! Opens one [`Session`] per configured interface and one
//! [`EndpointRuntime`] per telegram, then runs periodic publishers and
//! subscription listeners over a [`PdEngine`](trdp_engine::PdEngine).
//!
//! Layering, leaf first:
//!
//! - [`StackContext`]: process-wide engine init/teardown, reference counted
//!   by open sessions.
//! - [`Session`]: one engine session plus its background processing thread
//!   and the com id → subscriber registry.
//! - [`EndpointRuntime`]: direction, payload buffers, counters and the
//!   per-telegram timer thread.
//! - [`Simulator`]: the arena owning all of the above for a front end.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trdp_engine::SimEngine;
//! use trdp_runtime::{load_config, Simulator, StackContext};
//!
//! # fn example() -> Result<(), trdp_runtime::RuntimeError> {
//! let loaded = load_config("simulator.json")?;
//! let stack = Arc::new(StackContext::new(Arc::new(SimEngine::default())));
//! let sim = Simulator::start(&loaded.config, stack);
//! sim.start_all(Duration::from_millis(100));
//! std::thread::sleep(Duration::from_secs(1));
//! for row in sim.status() {
//!     println!("{} {} sent {}", row.interface, row.endpoint.com_id, row.endpoint.publish_count);
//! }
//! sim.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod endpoint;
pub mod error;
pub mod model;
pub mod session;
pub mod simulator;
pub mod stack;

pub use config::{load_config, parse_config, ConfigLoadResult};
pub use endpoint::{
    classify_direction, EndpointId, EndpointRuntime, EndpointStatus, PdDirection,
    SubscriptionSink,
};
pub use error::RuntimeError;
pub use model::{
    ComIdDatasetMapping, Dataset, DatasetElement, ExchangeType, InterfaceConfig,
    SimulatorConfig, TelegramConfig, TelegramEndpoint,
};
pub use session::{PdCallback, PdMessage, Session, SessionConfig, SessionId};
pub use simulator::{Simulator, StatusRow};
pub use stack::StackContext;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
