use std::time::Duration;

/// Default processing cycle of an engine session (10 ms).
pub const DEFAULT_PROCESS_CYCLE: Duration = Duration::from_millis(10);

/// Largest PD payload a single telegram may carry.
pub const MAX_PD_DATA_SIZE: usize = 1432;

/// Configuration for a [`SimEngine`](crate::SimEngine).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use trdp_engine::SimEngineConfig;
///
/// let config = SimEngineConfig::new()
///     .process_cycle(Duration::from_millis(5))
///     .inbox_capacity(512);
/// ```
#[derive(Debug, Clone)]
pub struct SimEngineConfig {
    /// Upper bound for the interval reported by `get_interval`.
    pub(crate) process_cycle: Duration,
    /// Maximum payload accepted by `publish`/`put`.
    pub(crate) max_payload: usize,
    /// Frames queued per session before the oldest is dropped.
    pub(crate) inbox_capacity: usize,
}

impl Default for SimEngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngineConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            process_cycle: DEFAULT_PROCESS_CYCLE,
            max_payload: MAX_PD_DATA_SIZE,
            inbox_capacity: 256,
        }
    }

    /// Set the processing cycle (default: 10 ms). Zero is raised to 1 ms.
    pub fn process_cycle(mut self, cycle: Duration) -> Self {
        self.process_cycle = cycle.max(Duration::from_millis(1));
        self
    }

    /// Set the maximum PD payload size (default: 1432 bytes).
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// Set the per-session inbox capacity (default: 256 frames).
    pub fn inbox_capacity(mut self, frames: usize) -> Self {
        self.inbox_capacity = frames.max(1);
        self
    }
}
