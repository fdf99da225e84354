//! Abort primitives shared by requests, bodies and the native bridge.
//!
//! An [`AbortSignal`] makes one irreversible transition from not-aborted to
//! aborted. Observers registered before the transition are notified
//! synchronously at the point of transition; async consumers park on
//! [`AbortSignal::cancelled`] at their suspension points instead. The token
//! underneath is [`tokio_util::sync::CancellationToken`], so a pending pull
//! or write unblocks as soon as the transition happens, not on the next
//! chunk.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AbortError;

/// Why a signal was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Application code called [`AbortController::abort`], with an optional
    /// message.
    Explicit(Option<String>),
    /// The native peer disconnected mid exchange.
    PeerDisconnected,
    /// A deadline set by the caller elapsed.
    Timeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Explicit(Some(message)) => write!(f, "{message}"),
            AbortReason::Explicit(None) => write!(f, "operation canceled"),
            AbortReason::PeerDisconnected => write!(f, "peer disconnected"),
            AbortReason::Timeout => write!(f, "operation timed out"),
        }
    }
}

type Observer = Box<dyn FnOnce(&AbortReason) + Send>;

struct Shared {
    token: CancellationToken,
    state: Mutex<State>,
}

struct State {
    reason: Option<AbortReason>,
    observers: Vec<Observer>,
}

/// Owner side of an abort pair. Created per exchange or per fetch call and
/// passed explicitly; there is no process wide controller.
pub struct AbortController {
    shared: Arc<Shared>,
}

/// Observer side of an abort pair. Cheap to clone; all clones observe the
/// same single transition.
#[derive(Clone)]
pub struct AbortSignal {
    shared: Arc<Shared>,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                token: CancellationToken::new(),
                state: Mutex::new(State { reason: None, observers: Vec::new() }),
            }),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal { shared: Arc::clone(&self.shared) }
    }

    /// Transitions the signal to aborted.
    ///
    /// Idempotent: only the first call transitions, notifies observers and
    /// wakes parked futures; later calls are no-ops.
    pub fn abort(&self, reason: AbortReason) {
        let observers = {
            let mut state = self.shared.state.lock().unwrap();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.observers)
        };

        debug!(%reason, "abort signal transitioned");
        self.shared.token.cancel();
        for observer in observers {
            observer(&reason);
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn aborted(&self) -> bool {
        self.shared.state.lock().unwrap().reason.is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.shared.state.lock().unwrap().reason.clone()
    }

    /// The abort error for an already-aborted signal, if any.
    pub fn abort_error(&self) -> Option<AbortError> {
        self.reason().map(AbortError::new)
    }

    /// Resolves once the signal transitions to aborted. Pending forever on a
    /// signal that is never aborted.
    pub async fn cancelled(&self) {
        self.shared.token.cancelled().await;
    }

    /// Registers an observer for the transition.
    ///
    /// If the signal is already aborted the observer runs immediately on the
    /// calling thread, matching the synchronous delivery it would have seen
    /// at transition time.
    pub fn on_abort<F>(&self, observer: F)
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        match state.reason.clone() {
            Some(reason) => {
                drop(state);
                observer(&reason);
            }
            None => state.observers.push(Box::new(observer)),
        }
    }
}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController").field("aborted", &self.signal().aborted()).finish()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal").field("aborted", &self.aborted()).field("reason", &self.reason()).finish()
    }
}
