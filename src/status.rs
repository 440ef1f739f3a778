//! Status codes and transport-error mapping.
//!
//! A resolved response always carries a numeric status: either a standard
//! HTTP code reported by the server, or one of a small set of domain
//! pseudo-codes outside the valid HTTP range that encode non-HTTP
//! conditions (connect failure, timeouts, unknown faults).
//!
//! Whenever the transport obtained a real HTTP status code, that code takes
//! precedence over any coarse error classification: a transfer that failed
//! mid-body after receiving a `301` is reported as `301`, not as a generic
//! fault.

use log::debug;

/// The transfer failed for a reason the engine could not classify.
pub const STATUS_UNKNOWN: u16 = 0xFFFF;

/// The connection-establishment phase exceeded the per-request timeout.
pub const STATUS_TIMEOUT: u16 = 0x1001;

/// DNS resolution, TCP connect, or proxy negotiation failed.
pub const STATUS_CONNECT_FAILED: u16 = 0x1002;

/// The transfer went idle longer than the driver's stall timeout after
/// activity had already been observed.
pub const STATUS_STALL_TIMEOUT: u16 = 0x1003;

/// Returns true when `code` is a standard HTTP status rather than one of
/// the domain pseudo-codes.
pub fn is_http_status(code: u16) -> bool {
    (100..600).contains(&code)
}

/// Classifies a transport-level failure into a domain pseudo-code.
///
/// Only called when no HTTP status was obtained; callers that already hold
/// a status code report it directly.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> u16 {
    let code = if err.is_connect() {
        STATUS_CONNECT_FAILED
    } else if err.is_timeout() {
        STATUS_TIMEOUT
    } else {
        STATUS_UNKNOWN
    };
    debug!("classified transport error as {code:#06x}: {err}");
    code
}
