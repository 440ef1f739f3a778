//! Response handles and promise-style completion.
//!
//! [`Engine::submit`](crate::Engine::submit) returns a [`ResponseHandle`]
//! immediately; the driver thread resolves the underlying state later.
//! Callers can poll ([`ready`](ResponseHandle::ready) /
//! [`canceled`](ResponseHandle::canceled)), block
//! ([`wait`](ResponseHandle::wait)), or register continuations
//! ([`then`](ResponseHandle::then) / [`except`](ResponseHandle::except)).

mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use state::Status;
pub(crate) use state::{Continuation, Outcome, ResponseState};

/// A shared handle to the outcome of one submitted request.
///
/// Cloning is cheap; all clones observe the same state. The status code,
/// headers, and content become available only once the response is
/// terminal, and are immutable from then on.
#[derive(Clone)]
pub struct ResponseHandle {
    state: Arc<ResponseState>,
}

impl ResponseHandle {
    pub(crate) fn from_state(state: Arc<ResponseState>) -> Self {
        ResponseHandle { state }
    }

    pub(crate) fn state(&self) -> &Arc<ResponseState> {
        &self.state
    }

    /// Current status: pending, ready, or canceled.
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Non-blocking check for natural completion.
    pub fn ready(&self) -> bool {
        self.state.status() == Status::Ready
    }

    /// Non-blocking check for cancellation.
    pub fn canceled(&self) -> bool {
        self.state.status() == Status::Canceled
    }

    /// Requests cooperative cancellation.
    ///
    /// Asynchronous: the driver observes the flag on its next sweep or at
    /// the next callback on this transfer. If the transfer completes
    /// naturally first, the completion wins and this request has no
    /// effect.
    pub fn cancel(&self) {
        self.state.request_cancel();
    }

    /// Blocks the calling thread until the response is terminal.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Blocks up to `timeout`. Returns true when the response is terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_timeout(timeout)
    }

    /// The final status code: an HTTP status, or a domain pseudo-code from
    /// [`crate::status`] for non-HTTP faults. `None` while pending.
    ///
    /// A canceled response reports the last status the transport obtained,
    /// or [`STATUS_UNKNOWN`](crate::status::STATUS_UNKNOWN) if none.
    pub fn status_code(&self) -> Option<u16> {
        self.state.outcome().map(|o| o.status_code)
    }

    /// Response headers, trimmed, with last-value-wins on duplicate keys.
    /// Empty while pending. Canceled responses carry best-effort partial
    /// headers.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.state
            .outcome()
            .map(|o| o.headers.clone())
            .unwrap_or_default()
    }

    /// Raw response content. Empty while pending, when an output sink
    /// consumed the download, and for HEAD requests. Canceled responses
    /// may carry partial content; check [`canceled`](Self::canceled)
    /// before trusting it.
    pub fn content(&self) -> &[u8] {
        self.state
            .outcome()
            .map(|o| o.content.as_slice())
            .unwrap_or_default()
    }

    /// Lossy UTF-8 view over [`content`](Self::content) for text payloads.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.content()).into_owned()
    }

    /// Bytes uploaded so far. Readable at any time for progress
    /// inspection.
    pub fn bytes_sent(&self) -> u64 {
        self.state.bytes_sent()
    }

    /// Bytes downloaded so far. Readable at any time for progress
    /// inspection.
    pub fn bytes_received(&self) -> u64 {
        self.state.bytes_received()
    }

    /// Registers a continuation to run when the response becomes ready.
    ///
    /// If the response is already ready, `callback` runs synchronously on
    /// the calling thread; otherwise it runs on the driver thread at the
    /// moment of resolution, so it must not block. Hand off to a
    /// caller-owned thread if further work needs a different execution
    /// context. A second `then` replaces the first.
    pub fn then(&self, callback: impl FnOnce(ResponseHandle) + Send + 'static) -> &Self {
        self.attach(Status::Ready, Box::new(callback));
        self
    }

    /// Registers a continuation to run if the response is canceled. Same
    /// delivery rules as [`then`](Self::then).
    pub fn except(&self, callback: impl FnOnce(ResponseHandle) + Send + 'static) -> &Self {
        self.attach(Status::Canceled, Box::new(callback));
        self
    }

    fn attach(&self, on: Status, callback: Continuation) {
        if let Some(callback) = self.state.register(on, callback) {
            // Already terminal with the matching status: fire on the
            // caller's thread.
            callback(self.clone());
        }
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("status", &self.status())
            .field("bytes_sent", &self.bytes_sent())
            .field("bytes_received", &self.bytes_received())
            .finish()
    }
}
