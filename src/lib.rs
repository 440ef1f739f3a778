//! courier: an asynchronous HTTP transfer engine.
//!
//! Build a [`Request`], submit it to an [`Engine`] from any thread, and
//! get a [`ResponseHandle`] back immediately. A dedicated background
//! driver thread multiplexes every in-flight transfer; callers observe
//! results by polling, blocking on [`ResponseHandle::wait`], or
//! registering [`then`](ResponseHandle::then) /
//! [`except`](ResponseHandle::except) continuations.
//!
//! # Example
//!
//! ```no_run
//! use courier::{Engine, Request};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new()?;
//!
//! let handle = engine.submit(
//!     Request::get("http://example.com/data.bin").timeout_secs(15.0),
//! )?;
//! handle.then(|resp| {
//!     println!("{}: {} bytes", resp.status_code().unwrap(), resp.content().len());
//! });
//!
//! handle.wait();
//! # Ok(())
//! # }
//! ```
//!
//! # Result contract
//!
//! Nothing that happens after [`Engine::submit`] returns is ever raised
//! as an error from an API call. Transport faults surface as domain
//! pseudo-codes in [`ResponseHandle::status_code`] (see [`status`]), and
//! cancellation is a distinct terminal outcome, not a failure. Inspect
//! [`ready`](ResponseHandle::ready) / [`canceled`](ResponseHandle::canceled)
//! before trusting content.

#![warn(missing_docs)]

mod config;
mod driver;
mod engine;
mod error;
mod request;
mod response;
pub mod status;
mod stream;
mod transfer;

pub use config::{
    EngineConfig, DEFAULT_STALL_TIMEOUT, DEFAULT_TICK_INTERVAL, DEFAULT_USER_AGENT,
};
pub use engine::Engine;
pub use error::{EngineError, RequestError};
pub use request::{Method, Request};
pub use response::{ResponseHandle, Status};
pub use stream::{MemoryReadStream, MemoryWriteStream, ReadStream, WriteStream};
