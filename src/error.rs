//! Error type definitions.
//!
//! Only two things in this crate surface as `Err`: structural request
//! validation at submission, and engine construction. Everything that
//! happens after `submit` returns is reported through the response state's
//! status code, never by unwinding a caller's stack (transport failures
//! occur on the driver thread long after the submitting call returned).

use thiserror::Error;

/// Errors raised synchronously by [`Engine::submit`](crate::Engine::submit)
/// for structurally invalid requests. No background work is started when
/// one of these is returned.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The request URL could not be parsed.
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A POST request was submitted without a content buffer or stream.
    #[error("POST request requires content")]
    MissingContent,

    /// A GET or HEAD request was submitted with a stream content source;
    /// only an in-memory buffer (or no body at all) is accepted for those
    /// methods.
    #[error("{0} request cannot carry a stream content source")]
    UnexpectedStream(crate::request::Method),

    /// The engine's driver thread is no longer accepting submissions.
    #[error("engine is shut down")]
    Shutdown,
}

/// Errors raised while constructing an [`Engine`](crate::Engine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The underlying HTTP client could not be built.
    #[error("HTTP client initialization error: {0}")]
    Client(#[from] reqwest::Error),

    /// The driver thread could not be spawned.
    #[error("driver thread spawn error: {0}")]
    Thread(#[from] std::io::Error),
}
