//! Export event delivery.
//!
//! Every session owns one unbounded channel. Workers and the controller
//! send from any task; the receiving end is the single place observers see
//! progress and the terminal outcome.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use reframe_common::error::ReframeError;
use tokio::sync::mpsc;

/// Notification emitted by an export session.
#[derive(Debug, Clone)]
pub enum ExportEvent {
    /// Fraction of the requested range written, in `[0, 1]`.
    Progress(f64),

    /// Output file finalized.
    Success(PathBuf),

    /// Export stopped. `None` means it was cancelled.
    Failure(Option<Arc<ReframeError>>),
}

impl ExportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportEvent::Progress(_))
    }
}

/// Receiving half of a session's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ExportEvent>;

/// Sending half of a session's event channel.
///
/// The first terminal event closes the notifier; anything sent afterwards
/// is dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<ExportEvent>,
    gate: Arc<ProgressGate>,
}

impl Notifier {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                gate: Arc::new(ProgressGate::default()),
            },
            rx,
        )
    }

    /// Report progress. Values are clamped and never regress.
    pub fn progress(&self, fraction: f64) {
        let mut state = self.gate.lock();
        if state.closed {
            return;
        }
        let value = state.admit(fraction);
        self.send(ExportEvent::Progress(value));
    }

    /// Report completion, preceded by a final `Progress(1.0)`.
    pub fn success(&self, destination: PathBuf) {
        let mut state = self.gate.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let value = state.admit(1.0);
        self.send(ExportEvent::Progress(value));
        self.send(ExportEvent::Success(destination));
    }

    pub fn failure(&self, cause: Option<Arc<ReframeError>>) {
        let mut state = self.gate.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.send(ExportEvent::Failure(cause));
    }

    /// Whether a terminal event has been sent.
    pub fn is_closed(&self) -> bool {
        self.gate.lock().closed
    }

    fn send(&self, event: ExportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Export event dropped; receiver closed");
        }
    }
}

/// Clamps progress into `[0, 1]` and keeps it non-decreasing.
///
/// Events are sent while the gate is held, so they reach the channel in
/// the order the gate admitted them.
#[derive(Debug, Default)]
pub struct ProgressGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    last: f64,
    closed: bool,
}

impl GateState {
    fn admit(&mut self, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        if fraction > self.last {
            self.last = fraction;
        }
        self.last
    }
}

impl ProgressGate {
    /// Value to report for a raw progress reading.
    pub fn admit(&self, fraction: f64) -> f64 {
        self.lock().admit(fraction)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
