/// Errors returned by a process-data engine.
///
/// Every variant maps to the conventional TRDP numeric error code (see
/// [`EngineError::code`]), which is what the runtime logs next to the
/// telegram id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("parameter error: {0}")]
    Param(String),

    #[error("engine initialization failed: {0}")]
    Init(String),

    #[error("engine not initialized")]
    NoInit,

    #[error("timed out")]
    Timeout,

    #[error("no data available")]
    NoData,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("out of memory: {0}")]
    Mem(String),

    #[error("thread error: {0}")]
    Thread(String),

    #[error("no such session")]
    NoSession,

    #[error("no such subscription")]
    NoSub,

    #[error("no such publication")]
    NoPub,

    #[error("invalid com id {0}")]
    ComId(u32),

    #[error("invalid state: {0}")]
    State(String),
}

impl EngineError {
    /// Numeric TRDP error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Param(_) => -1,
            EngineError::Init(_) => -2,
            EngineError::NoInit => -3,
            EngineError::Timeout => -4,
            EngineError::NoData => -5,
            EngineError::Io(_) => -7,
            EngineError::Mem(_) => -8,
            EngineError::Thread(_) => -13,
            EngineError::NoSession => -30,
            EngineError::NoSub => -32,
            EngineError::NoPub => -33,
            EngineError::ComId(_) => -38,
            EngineError::State(_) => -39,
        }
    }

    /// True when the engine can no longer serve the handle the caller holds.
    ///
    /// Periodic loops stop on these; every other error only skips one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::NoInit | EngineError::NoSession | EngineError::NoPub
        )
    }
}
