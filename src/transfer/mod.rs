//! Transfer adapter: binds one validated request to the transport.
//!
//! A [`Transfer`] is created when the driver dequeues a submission and is
//! destroyed when the transfer reaches a terminal outcome. It owns the
//! upload content and output sink, follows redirects manually on the
//! engine's redirect-disabled client (so redirect-count semantics stay
//! under our control), and accumulates headers and content into buffers
//! shared with the driver's sweep, so partial data survives a forced
//! termination.

mod body;

use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::StatusCode;
use url::Url;

use crate::error::RequestError;
use crate::request::{Content, Method, Request};
use crate::response::{Outcome, ResponseState, Status};
use crate::status::{classify_transport_error, STATUS_UNKNOWN};
use crate::stream::WriteStream;

use body::UploadStream;

/// A request that passed submission-time validation.
pub(crate) struct TransferSpec {
    pub url: Url,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub redirect_limit: Option<u32>,
    pub content: Content,
    pub output_sink: Option<Box<dyn WriteStream>>,
}

impl std::fmt::Debug for TransferSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSpec")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("redirect_limit", &self.redirect_limit)
            .field("content", &self.content)
            .field("output_sink", &self.output_sink.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Validates a request synchronously, before any background work starts.
///
/// Per-method content rules: GET and HEAD accept no content or an
/// in-memory buffer (some APIs require a body on GET); POST requires a
/// buffer or a stream.
pub(crate) fn validate(request: Request) -> Result<TransferSpec, RequestError> {
    let url = Url::parse(&request.url)?;
    match (request.method, &request.content) {
        (Method::Post, Content::None) => return Err(RequestError::MissingContent),
        (Method::Get | Method::Head, Content::Stream(_)) => {
            return Err(RequestError::UnexpectedStream(request.method))
        }
        _ => {}
    }
    Ok(TransferSpec {
        url,
        method: request.method,
        headers: request.headers,
        timeout: request.timeout,
        redirect_limit: request.redirect_limit,
        content: request.content,
        output_sink: request.output_sink,
    })
}

/// Accumulation buffers shared between the transfer task and the driver's
/// sweep. The sweep needs them to attach best-effort partial data when it
/// force-terminates a transfer.
#[derive(Default)]
pub(crate) struct TransferBuffers {
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub content: Vec<u8>,
}

/// Millisecond-resolution last-activity timestamp for stall detection
/// and connection-phase tracking.
pub(crate) struct ActivityClock {
    epoch: Instant,
    last_millis: AtomicU64,
    engaged: AtomicBool,
}

impl ActivityClock {
    pub(crate) fn new() -> Arc<ActivityClock> {
        Arc::new(ActivityClock {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
            engaged: AtomicBool::new(false),
        })
    }

    /// Records a byte of upload, header, or body activity.
    pub(crate) fn mark(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Relaxed);
        self.engaged.store(true, Ordering::Release);
    }

    /// Whether the transport has produced any activity at all. Bytes only
    /// flow once the connection is up, so this doubles as the end of the
    /// connection-establishment phase.
    pub(crate) fn engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Time since the last recorded activity (or since creation).
    pub(crate) fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

/// Why a transfer stopped before a normal completion.
enum TransferFault {
    /// The cooperative cancellation flag was observed.
    Canceled,
    /// No HTTP status was obtained; report this pseudo-code unless an
    /// earlier hop already yielded one.
    Code(u16),
}

/// One in-flight transfer bound to the transport.
pub(crate) struct Transfer {
    spec: TransferSpec,
    state: Arc<ResponseState>,
    buffers: Arc<Mutex<TransferBuffers>>,
    activity: Arc<ActivityClock>,
    client: reqwest::Client,
}

impl Transfer {
    pub(crate) fn new(
        spec: TransferSpec,
        state: Arc<ResponseState>,
        client: reqwest::Client,
    ) -> Self {
        Transfer {
            spec,
            state,
            buffers: Arc::new(Mutex::new(TransferBuffers::default())),
            activity: ActivityClock::new(),
            client,
        }
    }

    pub(crate) fn buffers(&self) -> Arc<Mutex<TransferBuffers>> {
        Arc::clone(&self.buffers)
    }

    pub(crate) fn activity(&self) -> Arc<ActivityClock> {
        Arc::clone(&self.activity)
    }

    /// Drives the transfer to its natural terminal transition. Runs
    /// entirely on the driver thread; the sweep may abort it at any await
    /// point and finalize the state itself.
    pub(crate) async fn run(mut self) {
        debug!("transfer started: {} {}", self.spec.method, self.spec.url);
        let result = self.drive().await;
        let Transfer {
            state, buffers, ..
        } = self;
        match result {
            Ok(()) => {
                finalize_ready(&state, &buffers, STATUS_UNKNOWN);
            }
            Err(TransferFault::Canceled) => {
                finalize_canceled(&state, &buffers);
            }
            Err(TransferFault::Code(code)) => {
                if state.cancel_requested() {
                    // The fault was provoked by (or lost the race against)
                    // a cancellation request.
                    finalize_canceled(&state, &buffers);
                } else {
                    finalize_ready(&state, &buffers, code);
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<(), TransferFault> {
        let mut current = self.spec.url.clone();
        let mut method = self.spec.method;
        // Cleared when a redirect rewrites the method, so a converted GET
        // does not replay the original body.
        let mut include_body = true;
        // The stream source is consumed by the first dispatch; remembered
        // here because a preserved-method redirect cannot replay it.
        let stream_upload = matches!(self.spec.content, Content::Stream(_));
        let mut hops: u32 = 0;

        let response = loop {
            if self.state.cancel_requested() {
                return Err(TransferFault::Canceled);
            }

            let response = self.dispatch(&current, method, include_body).await?;
            self.activity.mark();

            let status = response.status();
            {
                let mut buffers = self.buffers.lock().unwrap();
                buffers.status_code = Some(status.as_u16());
                collect_headers(&mut buffers.headers, response.headers());
            }

            if !status.is_redirection() || !self.may_follow(hops) {
                break response;
            }
            let Some(next) = redirect_target(&current, &response) else {
                break response;
            };
            let next_method = redirect_method(method, status);
            if next_method == Method::Post && stream_upload {
                // 307/308 would have to replay the body, but a sequential
                // stream cannot be rewound; the redirect response itself
                // becomes the result.
                warn!("cannot replay stream body across {status} redirect; stopping at {current}");
                break response;
            }

            debug!("following {status} redirect: {current} -> {next}");
            include_body = include_body && next_method == method;
            method = next_method;
            current = next;
            hops += 1;
        };

        self.download(response).await
    }

    /// Sends one hop and waits for its response headers. Deliberately
    /// unbounded here: the connection-phase timeout is enforced by the
    /// driver's sweep, which must not count a steadily progressing upload
    /// against it.
    async fn dispatch(
        &mut self,
        url: &Url,
        method: Method,
        include_body: bool,
    ) -> Result<reqwest::Response, TransferFault> {
        let mut builder = self.client.request(method.into(), url.clone());
        for (key, value) in &self.spec.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let mut buffer_len = None;
        if include_body {
            match (&mut self.spec.content, method) {
                (Content::Buffer(data), Method::Get | Method::Post) => {
                    // Sized body: the transport derives Content-Length
                    // from the buffer.
                    buffer_len = Some(data.len() as u64);
                    builder = builder.body(data.clone());
                }
                (content @ Content::Stream(_), Method::Post) => {
                    let Content::Stream(source) = mem::replace(content, Content::None) else {
                        unreachable!()
                    };
                    let upload = UploadStream::new(
                        source,
                        Arc::clone(&self.state),
                        Arc::clone(&self.activity),
                    );
                    builder = builder.body(upload.into_body());
                }
                // HEAD never carries a body; absent content sends none.
                _ => {}
            }
        }

        match builder.send().await {
            Ok(response) => {
                // A buffer upload completes inside send(); account for it
                // once the hop went through.
                if let Some(len) = buffer_len {
                    self.state.add_bytes_sent(len);
                }
                Ok(response)
            }
            Err(err) if self.state.cancel_requested() => {
                debug!("dispatch failed after cancellation request: {err}");
                Err(TransferFault::Canceled)
            }
            Err(err) => Err(TransferFault::Code(classify_transport_error(&err))),
        }
    }

    /// Consumes the response body chunk by chunk: forwarded to the output
    /// sink when one was supplied, appended to the content buffer
    /// otherwise.
    async fn download(&mut self, mut response: reqwest::Response) -> Result<(), TransferFault> {
        loop {
            if self.state.cancel_requested() {
                return Err(TransferFault::Canceled);
            }
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    self.activity.mark();
                    self.state.add_bytes_received(chunk.len() as u64);
                    if let Some(sink) = &mut self.spec.output_sink {
                        if let Err(err) = write_to_sink(sink.as_mut(), &chunk) {
                            // The status code is already known; the sink
                            // failure only truncates the download.
                            warn!("output sink failed, aborting download: {err}");
                            return Ok(());
                        }
                    } else {
                        self.buffers.lock().unwrap().content.extend_from_slice(&chunk);
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    // Headers were received, so a numeric status exists
                    // and takes precedence over this late fault.
                    warn!("body read failed after status was obtained: {err}");
                    return Ok(());
                }
            }
        }
    }

    fn may_follow(&self, hops: u32) -> bool {
        match self.spec.redirect_limit {
            None => true,
            Some(limit) => hops < limit,
        }
    }
}

/// Writes a whole chunk to a caller-supplied sink, absorbing panics at
/// the boundary.
fn write_to_sink(sink: &mut dyn WriteStream, chunk: &[u8]) -> io::Result<()> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut written = 0;
        while written < chunk.len() {
            let n = sink.write(&chunk[written..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "output sink accepted zero bytes",
                ));
            }
            written += n;
        }
        Ok(())
    }));
    result.unwrap_or_else(|_| Err(io::Error::other("output sink panicked")))
}

/// Upserts response headers into the ordered map with trimmed keys and
/// values; on duplicate keys the last value wins.
pub(crate) fn collect_headers(
    map: &mut BTreeMap<String, String>,
    headers: &reqwest::header::HeaderMap,
) {
    for (name, value) in headers {
        let key = name.as_str().trim().to_string();
        let value = String::from_utf8_lossy(value.as_bytes()).trim().to_string();
        map.insert(key, value);
    }
}

/// Resolves the next hop from a redirect response, joining relative
/// `Location` values against the current URL.
fn redirect_target(current: &Url, response: &reqwest::Response) -> Option<Url> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    Url::parse(location)
        .or_else(|_| current.join(location))
        .ok()
}

/// Conventional method rewriting across redirects: 303 always downgrades
/// to GET (HEAD stays HEAD), 301/302 downgrade POST to GET, 307/308
/// preserve the method.
fn redirect_method(method: Method, status: StatusCode) -> Method {
    match status.as_u16() {
        303 => {
            if method == Method::Head {
                Method::Head
            } else {
                Method::Get
            }
        }
        301 | 302 => {
            if method == Method::Post {
                Method::Get
            } else {
                method
            }
        }
        _ => method,
    }
}

/// Terminal transition helpers, shared by the transfer task and the
/// driver's sweep.
pub(crate) fn finalize_ready(
    state: &Arc<ResponseState>,
    buffers: &Mutex<TransferBuffers>,
    fallback_code: u16,
) -> bool {
    let outcome = take_outcome(buffers, fallback_code, None);
    state.resolve(Status::Ready, outcome)
}

pub(crate) fn finalize_canceled(
    state: &Arc<ResponseState>,
    buffers: &Mutex<TransferBuffers>,
) -> bool {
    let outcome = take_outcome(buffers, STATUS_UNKNOWN, None);
    state.resolve(Status::Canceled, outcome)
}

/// Finalizes with a forced status code, overriding any buffered HTTP
/// status. Used for stall termination, where reporting the pre-stall
/// status would disguise a truncated transfer as a success.
pub(crate) fn finalize_with_code(
    state: &Arc<ResponseState>,
    buffers: &Mutex<TransferBuffers>,
    code: u16,
) -> bool {
    let outcome = take_outcome(buffers, code, Some(code));
    state.resolve(Status::Ready, outcome)
}

fn take_outcome(
    buffers: &Mutex<TransferBuffers>,
    fallback_code: u16,
    force_code: Option<u16>,
) -> Outcome {
    let mut buffers = buffers.lock().unwrap();
    Outcome {
        status_code: force_code.unwrap_or_else(|| buffers.status_code.unwrap_or(fallback_code)),
        headers: mem::take(&mut buffers.headers),
        content: mem::take(&mut buffers.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::STATUS_STALL_TIMEOUT;
    use crate::stream::MemoryReadStream;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    #[test]
    fn post_without_content_is_rejected() {
        let err = validate(Request::post("http://example.com")).unwrap_err();
        assert!(matches!(err, RequestError::MissingContent));
    }

    #[test]
    fn get_with_stream_is_rejected() {
        let err = validate(
            Request::get("http://example.com")
                .content_stream(MemoryReadStream::new(b"body".to_vec())),
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedStream(Method::Get)));
    }

    #[test]
    fn get_with_buffer_is_accepted() {
        // Rare, but some APIs require a body on GET.
        assert!(validate(Request::get("http://example.com").content(b"q".to_vec())).is_ok());
    }

    #[test]
    fn head_without_content_is_accepted() {
        assert!(validate(Request::head("http://example.com")).is_ok());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = validate(Request::get("not a url")).unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl(_)));
    }

    #[test]
    fn collect_headers_trims_and_keeps_last_duplicate() {
        let mut raw = HeaderMap::new();
        raw.append(
            HeaderName::from_static("x-flavor"),
            HeaderValue::from_static("first"),
        );
        raw.append(
            HeaderName::from_static("x-flavor"),
            HeaderValue::from_static("  second  "),
        );
        raw.append(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/html"),
        );

        let mut map = BTreeMap::new();
        collect_headers(&mut map, &raw);
        assert_eq!(map.get("x-flavor").map(String::as_str), Some("second"));
        assert_eq!(map.get("content-type").map(String::as_str), Some("text/html"));
    }

    #[test]
    fn redirect_method_rewrites() {
        assert_eq!(
            redirect_method(Method::Post, StatusCode::SEE_OTHER),
            Method::Get
        );
        assert_eq!(
            redirect_method(Method::Head, StatusCode::SEE_OTHER),
            Method::Head
        );
        assert_eq!(
            redirect_method(Method::Post, StatusCode::MOVED_PERMANENTLY),
            Method::Get
        );
        assert_eq!(
            redirect_method(Method::Get, StatusCode::FOUND),
            Method::Get
        );
        assert_eq!(
            redirect_method(Method::Post, StatusCode::TEMPORARY_REDIRECT),
            Method::Post
        );
        assert_eq!(
            redirect_method(Method::Post, StatusCode::PERMANENT_REDIRECT),
            Method::Post
        );
    }

    #[test]
    fn finalize_ready_prefers_buffered_status() {
        let state = ResponseState::new();
        let buffers = Mutex::new(TransferBuffers {
            status_code: Some(301),
            ..TransferBuffers::default()
        });
        assert!(finalize_ready(&state, &buffers, STATUS_UNKNOWN));
        assert_eq!(state.outcome().unwrap().status_code, 301);
    }

    #[test]
    fn finalize_with_code_overrides_buffered_status() {
        let state = ResponseState::new();
        let buffers = Mutex::new(TransferBuffers {
            status_code: Some(200),
            content: b"truncated".to_vec(),
            ..TransferBuffers::default()
        });
        assert!(finalize_with_code(&state, &buffers, STATUS_STALL_TIMEOUT));
        let outcome = state.outcome().unwrap();
        assert_eq!(outcome.status_code, STATUS_STALL_TIMEOUT);
        assert_eq!(outcome.content, b"truncated");
    }

    #[test]
    fn activity_clock_tracks_idle_time() {
        let clock = ActivityClock::new();
        clock.mark();
        assert!(clock.idle() < Duration::from_secs(1));
    }

    #[test]
    fn activity_clock_engages_on_first_mark() {
        let clock = ActivityClock::new();
        assert!(!clock.engaged());
        clock.mark();
        assert!(clock.engaged());
    }
}
