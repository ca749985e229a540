//! Call contexts.
//!
//! [`CallContext`] is the execution engine's view of a call: it owns the
//! deadline and the abortion state. Application behavior never sees it
//! directly; it receives an [`RpcContext`] produced by [`rpc_context`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Why the engine stopped a call before it completed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abortion {
    /// The call was cancelled by one of the parties.
    Cancelled,
    /// The deadline passed.
    Expired,
    /// The connection carrying the call failed.
    NetworkFailure,
    /// The invoking side failed.
    ServicedFailure,
    /// The servicing side failed.
    ServicerFailure,
}

/// Abortion kinds as seen by application behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortionKind {
    /// The call was cancelled by one of the parties.
    Cancelled,
    /// The deadline passed.
    Expired,
    /// The connection carrying the call failed.
    NetworkFailure,
    /// The invoking side failed.
    ServicedFailure,
    /// The servicing side failed.
    ServicerFailure,
}

impl From<Abortion> for AbortionKind {
    fn from(abortion: Abortion) -> Self {
        match abortion {
            Abortion::Cancelled => AbortionKind::Cancelled,
            Abortion::Expired => AbortionKind::Expired,
            Abortion::NetworkFailure => AbortionKind::NetworkFailure,
            Abortion::ServicedFailure => AbortionKind::ServicedFailure,
            Abortion::ServicerFailure => AbortionKind::ServicerFailure,
        }
    }
}

impl fmt::Display for AbortionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortionKind::Cancelled => "cancelled",
            AbortionKind::Expired => "expired",
            AbortionKind::NetworkFailure => "network failure",
            AbortionKind::ServicedFailure => "serviced failure",
            AbortionKind::ServicerFailure => "servicer failure",
        };
        f.write_str(s)
    }
}

type AbortionCallback = Box<dyn FnOnce(Abortion) + Send>;

/// Engine-side state of a single call.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CallState>,
}

struct CallState {
    deadline: Option<Instant>,
    abortion: Mutex<AbortionState>,
}

#[derive(Default)]
struct AbortionState {
    aborted: Option<Abortion>,
    callbacks: Vec<AbortionCallback>,
}

impl CallContext {
    /// A call with no deadline.
    pub fn new() -> Self {
        Self::from_deadline(None)
    }

    /// A call that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_deadline(Instant::now().checked_add(timeout))
    }

    /// A call that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::from_deadline(Some(deadline))
    }

    fn from_deadline(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(CallState {
                deadline,
                abortion: Mutex::new(AbortionState::default()),
            }),
        }
    }

    /// Whether the call is still running: not aborted and not past its deadline.
    pub fn is_active(&self) -> bool {
        if self.inner.abortion.lock().aborted.is_some() {
            return false;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    /// Time left before the deadline. `None` if the call has no deadline.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// How the call was aborted, if it was.
    pub fn abortion(&self) -> Option<Abortion> {
        self.inner.abortion.lock().aborted
    }

    /// Register a callback to run when the call is aborted.
    ///
    /// If the call has already been aborted the callback runs immediately,
    /// on the calling thread.
    pub fn add_abortion_callback(&self, callback: impl FnOnce(Abortion) + Send + 'static) {
        let mut state = self.inner.abortion.lock();
        let aborted = state.aborted;
        match aborted {
            Some(abortion) => {
                drop(state);
                callback(abortion);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Abort the call.
    ///
    /// Only the first abort is recorded; it runs every registered callback
    /// once and returns `true`. Later aborts return `false`.
    pub fn abort(&self, abortion: Abortion) -> bool {
        let callbacks = {
            let mut state = self.inner.abortion.lock();
            if let Some(previous) = state.aborted {
                tracing::trace!(?previous, ?abortion, "call already aborted");
                return false;
            }
            state.aborted = Some(abortion);
            std::mem::take(&mut state.callbacks)
        };

        tracing::debug!(?abortion, callbacks = callbacks.len(), "call aborted");
        // Callbacks run outside the lock so they may inspect the context.
        for callback in callbacks {
            callback(abortion);
        }
        true
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("deadline", &self.inner.deadline)
            .field("abortion", &self.abortion())
            .finish()
    }
}

/// The context application behavior receives.
#[derive(Clone, Debug)]
pub struct RpcContext {
    call: CallContext,
}

impl RpcContext {
    /// Whether the call is still running.
    pub fn is_active(&self) -> bool {
        self.call.is_active()
    }

    /// Time left before the deadline. `None` if the call has no deadline.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.call.time_remaining()
    }

    /// Register a callback to run if the call is aborted.
    pub fn add_abortion_callback(&self, callback: impl FnOnce(AbortionKind) + Send + 'static) {
        self.call
            .add_abortion_callback(move |abortion| callback(AbortionKind::from(abortion)));
    }
}

/// Expose an engine call context to application behavior.
pub fn rpc_context(call: CallContext) -> RpcContext {
    RpcContext { call }
}
