//! Shared response state internals.
//!
//! One `ResponseState` is created per submission and shared, reference
//! counted, between the caller's handle, the driver's transfer, and any
//! registered continuations. All mutation funnels through the atomic
//! status field: the pending→ready and pending→canceled transitions are
//! decided by a single compare-and-exchange, so a racing cancellation and
//! natural completion have exactly one winner and the loser performs no
//! further mutation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::debug;

use crate::response::ResponseHandle;

/// Point-in-time status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The transfer has not reached a terminal outcome yet.
    Pending = 0,
    /// The transfer completed (successfully or with a fault encoded in the
    /// status code).
    Ready = 1,
    /// The transfer was canceled before completing.
    Canceled = 2,
}

impl Status {
    fn from_u8(raw: u8) -> Status {
        match raw {
            1 => Status::Ready,
            2 => Status::Canceled,
            _ => Status::Pending,
        }
    }
}

/// The immutable result of a terminal transition.
///
/// Written exactly once by the transition winner; readable without locks
/// afterwards.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub content: Vec<u8>,
}

pub(crate) type Continuation = Box<dyn FnOnce(ResponseHandle) + Send>;

#[derive(Default)]
pub(crate) struct Continuations {
    pub on_ready: Option<Continuation>,
    pub on_cancel: Option<Continuation>,
}

/// The shared completion record.
pub(crate) struct ResponseState {
    status: AtomicU8,
    cancel_requested: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    outcome: OnceLock<Outcome>,
    continuations: Mutex<Continuations>,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
}

impl ResponseState {
    pub(crate) fn new() -> Arc<ResponseState> {
        Arc::new(ResponseState {
            status: AtomicU8::new(Status::Pending as u8),
            cancel_requested: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            outcome: OnceLock::new(),
            continuations: Mutex::new(Continuations::default()),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
        })
    }

    pub(crate) fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Sets the cooperative cancellation flag. The driver observes it on
    /// its next sweep or at the next callback on this transfer.
    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub(crate) fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Performs the terminal transition. Returns false if another caller
    /// already resolved this state; the loser mutates nothing and fires
    /// nothing.
    pub(crate) fn resolve(self: &Arc<Self>, terminal: Status, outcome: Outcome) -> bool {
        debug_assert!(terminal != Status::Pending);
        if self
            .status
            .compare_exchange(
                Status::Pending as u8,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        debug!(
            "response resolved: {terminal:?}, status_code={:#x}, {} header(s), {} content byte(s)",
            outcome.status_code,
            outcome.headers.len(),
            outcome.content.len()
        );

        // The winner publishes the outcome exactly once.
        let _ = self.outcome.set(outcome);

        // Deliver at most one continuation; the non-matching one is
        // dropped so its captures are released. Continuations run before
        // waiters are woken, so a caller returning from wait() always
        // observes their effects.
        let fired = {
            let mut slot = self.continuations.lock().unwrap();
            let Continuations {
                on_ready,
                on_cancel,
            } = std::mem::take(&mut *slot);
            match terminal {
                Status::Ready => on_ready,
                Status::Canceled => on_cancel,
                Status::Pending => None,
            }
        };
        if let Some(callback) = fired {
            callback(ResponseHandle::from_state(Arc::clone(self)));
        }

        // Wake blocked wait() callers. Taking the lock orders the notify
        // after any in-progress pending check on the waiter side.
        {
            let _guard = self.wait_lock.lock().unwrap();
            self.wait_cv.notify_all();
        }
        true
    }

    /// The resolved outcome, or `None` while pending.
    ///
    /// The outcome is published immediately after the status transition;
    /// a reader that races the resolver between the two steps spins for
    /// the handful of instructions until it appears.
    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        if self.status() == Status::Pending {
            return None;
        }
        loop {
            if let Some(outcome) = self.outcome.get() {
                return Some(outcome);
            }
            std::hint::spin_loop();
        }
    }

    /// Registers a continuation, or returns it for synchronous delivery
    /// when the state is already terminal.
    ///
    /// The status check happens under the slot lock: if the resolver has
    /// already taken the slot, the status is necessarily terminal here and
    /// the callback is handed back instead of being stored, so delivery is
    /// exactly-once either way.
    pub(crate) fn register(
        &self,
        on: Status,
        callback: Continuation,
    ) -> Option<Continuation> {
        debug_assert!(on != Status::Pending);
        let mut slot = self.continuations.lock().unwrap();
        match self.status() {
            Status::Pending => {
                match on {
                    Status::Ready => slot.on_ready = Some(callback),
                    Status::Canceled => slot.on_cancel = Some(callback),
                    Status::Pending => {}
                }
                None
            }
            terminal if terminal == on => Some(callback),
            _ => None,
        }
    }

    /// Blocks the calling thread until the state is terminal.
    pub(crate) fn wait(&self) {
        let mut guard = self.wait_lock.lock().unwrap();
        while self.status() == Status::Pending {
            guard = self.wait_cv.wait(guard).unwrap();
        }
    }

    /// Blocks up to `timeout`; returns true when the state is terminal.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.wait_lock.lock().unwrap();
        while self.status() == Status::Pending {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (g, result) = self.wait_cv.wait_timeout(guard, remaining).unwrap();
            guard = g;
            if result.timed_out() && self.status() == Status::Pending {
                return false;
            }
        }
        true
    }
}
