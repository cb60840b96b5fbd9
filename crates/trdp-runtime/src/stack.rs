//! Process-wide engine lifecycle shared by every session.

use std::sync::{Arc, Mutex};

use trdp_engine::{EngineError, PdEngine};

use crate::lock;

/// Owns global initialisation and teardown of a [`PdEngine`].
///
/// Sessions share one context (`Arc<StackContext>`). The first session to
/// open initialises the engine; when the last open session releases it, the
/// engine is terminated and the context returns to uninitialised. A failed
/// initialisation is cached and handed to every later caller.
pub struct StackContext {
    engine: Arc<dyn PdEngine>,
    state: Mutex<StackState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Ready,
    Failed(EngineError),
}

struct StackState {
    init: InitState,
    sessions: usize,
}

impl StackContext {
    pub fn new(engine: Arc<dyn PdEngine>) -> Self {
        Self {
            engine,
            state: Mutex::new(StackState {
                init: InitState::Uninitialized,
                sessions: 0,
            }),
        }
    }

    pub fn engine(&self) -> Arc<dyn PdEngine> {
        self.engine.clone()
    }

    /// Initialise the engine once; later calls return the cached outcome.
    pub fn ensure_initialized(&self) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        self.init_locked(&mut state)
    }

    fn init_locked(&self, state: &mut StackState) -> Result<(), EngineError> {
        match &state.init {
            InitState::Ready => return Ok(()),
            InitState::Failed(err) => return Err(err.clone()),
            InitState::Uninitialized => {}
        }

        match self.engine.init() {
            Ok(()) => {
                tracing::info!("initialized TRDP stack");
                state.init = InitState::Ready;
                Ok(())
            }
            Err(err) => {
                tracing::error!(code = err.code(), "failed to initialize TRDP stack: {err}");
                state.init = InitState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Register one more open session, initialising the engine if needed.
    ///
    /// Returns the new session count.
    pub fn acquire(&self) -> Result<usize, EngineError> {
        let mut state = lock(&self.state);
        self.init_locked(&mut state)?;
        state.sessions += 1;
        Ok(state.sessions)
    }

    /// Undo an [`acquire`](Self::acquire) whose session never opened.
    ///
    /// Never tears the engine down.
    pub fn abandon(&self) {
        let mut state = lock(&self.state);
        state.sessions = state.sessions.saturating_sub(1);
    }

    /// Drop one open session; the last one out terminates the engine.
    pub fn release(&self) {
        let mut state = lock(&self.state);
        if state.sessions == 0 {
            tracing::warn!("stack release without a matching acquire");
            return;
        }
        state.sessions -= 1;
        if state.sessions > 0 || state.init != InitState::Ready {
            return;
        }

        match self.engine.terminate() {
            Ok(()) => tracing::info!("terminated TRDP stack"),
            Err(err) => {
                tracing::error!(code = err.code(), "failed to terminate TRDP stack: {err}")
            }
        }
        state.init = InitState::Uninitialized;
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).init == InitState::Ready
    }
}
