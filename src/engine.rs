//! The engine: submission entry point and driver lifecycle.

use log::{debug, error};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::driver::{self, Submission};
use crate::error::{EngineError, RequestError};
use crate::request::Request;
use crate::response::{ResponseHandle, ResponseState};
use crate::transfer;

/// An asynchronous HTTP transfer engine.
///
/// Owns the background driver thread and the shared transport client
/// (connection pool, TLS session cache, DNS state). Requests submitted
/// from any thread are driven to completion on the driver thread; the
/// returned [`ResponseHandle`] is the only window into the result.
///
/// Dropping the engine (or calling [`shutdown`](Engine::shutdown)) joins
/// the driver thread after force-canceling every remaining transfer, so
/// no handle is left pending forever.
pub struct Engine {
    tx: mpsc::UnboundedSender<Submission>,
    token: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Result<Engine, EngineError> {
        Engine::with_config(EngineConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    pub fn with_config(config: EngineConfig) -> Result<Engine, EngineError> {
        // Redirects are followed manually by the transfer adapter, so the
        // shared client never follows them on its own.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let thread = driver::spawn(config, client, rx, token.clone())?;
        Ok(Engine {
            tx,
            token,
            thread: Some(thread),
        })
    }

    /// Validates and submits a request, returning its handle immediately.
    ///
    /// Never blocks on DNS, connect, or any network byte: validation is
    /// purely structural and the transfer starts on the driver thread
    /// after this call has returned.
    ///
    /// # Errors
    ///
    /// [`RequestError`] for structurally invalid requests (unparsable URL,
    /// POST without content, stream content on GET/HEAD) and for
    /// submissions after shutdown. No background work starts in any error
    /// case.
    pub fn submit(&self, request: Request) -> Result<ResponseHandle, RequestError> {
        let spec = transfer::validate(request)?;
        debug!("submitting {} {}", spec.method, spec.url);
        let state = ResponseState::new();
        let handle = ResponseHandle::from_state(state.clone());
        self.tx
            .send(Submission { spec, state })
            .map_err(|_| RequestError::Shutdown)?;
        Ok(handle)
    }

    /// Shuts the engine down, force-canceling in-flight transfers and
    /// joining the driver thread. Equivalent to dropping the engine.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.token.cancel();
            if thread.join().is_err() {
                error!("driver thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
