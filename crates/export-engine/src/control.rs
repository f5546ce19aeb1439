//! Session terminal-state arbitration.
//!
//! Cancellation, worker failures and finalize all race to end an export.
//! Each of them claims the session state with a compare-and-swap; only the
//! winner reports, so an export produces exactly one terminal event.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use reframe_common::error::ReframeError;
use tokio_util::sync::CancellationToken;

use crate::media::{MediaReader, MediaWriter};
use crate::notify::Notifier;

/// Lifecycle of one export session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Finalizing = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl SessionState {
    fn from_u8(raw: u8) -> SessionState {
        match raw {
            0 => SessionState::Idle,
            1 => SessionState::Running,
            2 => SessionState::Finalizing,
            3 => SessionState::Completed,
            4 => SessionState::Failed,
            _ => SessionState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// How an export ended.
#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(PathBuf),
    Failed(Arc<ReframeError>),
    Cancelled,
}

impl ExportOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExportOutcome::Completed(_))
    }

    pub fn destination(&self) -> Option<&PathBuf> {
        match self {
            ExportOutcome::Completed(path) => Some(path),
            _ => None,
        }
    }

    /// The failure cause, if the export failed.
    pub fn error(&self) -> Option<&ReframeError> {
        match self {
            ExportOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

type Endpoints = (Arc<dyn MediaReader>, Arc<dyn MediaWriter>);

/// Shared control block of one session.
pub struct ExportControl {
    state: AtomicU8,
    token: CancellationToken,
    notifier: Notifier,
    endpoints: Mutex<Option<Endpoints>>,
    failure: Mutex<Option<Arc<ReframeError>>>,
}

impl ExportControl {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            token: CancellationToken::new(),
            notifier,
            endpoints: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Token cancelled as soon as the session reaches a failed or cancelled state.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move from any non-terminal state to `to`.
    fn claim_terminal(&self, to: SessionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if SessionState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `Idle -> Running`. Fails when the session was cancelled or already ran.
    pub fn start(&self) -> Result<(), ReframeError> {
        if self.transition(SessionState::Idle, SessionState::Running) {
            return Ok(());
        }
        match self.state() {
            SessionState::Cancelled => Err(ReframeError::Cancelled),
            _ => Err(ReframeError::setup("Session already started")),
        }
    }

    /// Remember the reader and writer so a later cancel can halt them.
    ///
    /// When the session ended before registration, both are halted
    /// immediately and `Cancelled` is returned.
    pub fn register(
        &self,
        reader: Arc<dyn MediaReader>,
        writer: Arc<dyn MediaWriter>,
    ) -> Result<(), ReframeError> {
        {
            let mut endpoints = lock(&self.endpoints);
            *endpoints = Some((reader, writer));
        }
        if self.state().is_terminal() {
            self.halt_endpoints();
            return Err(ReframeError::Cancelled);
        }
        Ok(())
    }

    /// Request cancellation. Only the first call that ends the session
    /// halts the pipeline and reports; it returns `true`.
    pub fn cancel(&self) -> bool {
        if !self.claim_terminal(SessionState::Cancelled) {
            tracing::debug!(state = ?self.state(), "Cancel ignored; session already ended");
            return false;
        }
        tracing::info!("Export cancelled");
        self.token.cancel();
        self.halt_endpoints();
        self.notifier.failure(None);
        true
    }

    /// End the session with an error. Ignored once the session has ended.
    pub fn fail(&self, err: ReframeError) -> bool {
        if !self.claim_terminal(SessionState::Failed) {
            tracing::debug!(error = %err, "Error after session ended; ignoring");
            return false;
        }
        tracing::error!(error = %err, "Export failed");
        let cause = Arc::new(err);
        *lock(&self.failure) = Some(Arc::clone(&cause));
        self.token.cancel();
        self.halt_endpoints();
        self.notifier.failure(Some(cause));
        true
    }

    /// `Running -> Finalizing`. Exactly one caller wins.
    pub fn begin_finalize(&self) -> bool {
        self.transition(SessionState::Running, SessionState::Finalizing)
    }

    /// `Finalizing -> Completed`, reporting success.
    pub fn complete(&self, destination: PathBuf) -> bool {
        if !self.transition(SessionState::Finalizing, SessionState::Completed) {
            return false;
        }
        tracing::info!(output = %destination.display(), "Export complete");
        self.notifier.success(destination);
        true
    }

    /// Outcome once the session has ended.
    pub fn outcome(&self, destination: PathBuf) -> Option<ExportOutcome> {
        match self.state() {
            SessionState::Completed => Some(ExportOutcome::Completed(destination)),
            SessionState::Cancelled => Some(ExportOutcome::Cancelled),
            SessionState::Failed => {
                let cause = lock(&self.failure).clone().unwrap_or_else(|| {
                    Arc::new(ReframeError::Other(anyhow::anyhow!("Export failed")))
                });
                Some(ExportOutcome::Failed(cause))
            }
            _ => None,
        }
    }

    fn halt_endpoints(&self) {
        let endpoints = lock(&self.endpoints).clone();
        if let Some((reader, writer)) = endpoints {
            reader.cancel_reading();
            writer.cancel_writing();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
