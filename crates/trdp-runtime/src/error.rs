use std::path::PathBuf;

use trdp_engine::EngineError;

use crate::endpoint::PdDirection;

/// Errors returned by the simulator runtime.
///
/// Every failure is also logged where it happens; callers that only poll
/// status may ignore the returned error.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("engine error (code {}): {}", .0.code(), .0)]
    Engine(#[from] EngineError),

    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("session is not open")]
    NotOpen,

    #[error("com id {com_id} is not allowed to transmit (direction {direction})")]
    TransmitNotPermitted { com_id: u32, direction: PdDirection },

    #[error("failed to spawn thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown endpoint {0}")]
    UnknownEndpoint(usize),
}

impl RuntimeError {
    /// Engine error code, when the failure came from the engine.
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            RuntimeError::Engine(err) => Some(err.code()),
            _ => None,
        }
    }
}
