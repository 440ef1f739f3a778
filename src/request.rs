//! Request construction.
//!
//! A [`Request`] is a plain builder value: every setter is a pure mutation
//! and no I/O happens until the request is handed to
//! [`Engine::submit`](crate::Engine::submit). At submission, ownership of
//! the upload content and output sink moves to the transfer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::stream::{ReadStream, WriteStream};

/// HTTP method supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP HEAD.
    Head,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Head => write!(f, "HEAD"),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

/// Upload content source: absent, an in-memory buffer, or a sequential
/// readable stream. Exactly one is held at a time; setting one clears the
/// other.
pub(crate) enum Content {
    None,
    Buffer(Vec<u8>),
    Stream(Box<dyn ReadStream>),
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::None => write!(f, "Content::None"),
            Content::Buffer(data) => write!(f, "Content::Buffer({} bytes)", data.len()),
            Content::Stream(stream) => write!(f, "Content::Stream({} bytes)", stream.length()),
        }
    }
}

/// An HTTP request under construction.
///
/// ```no_run
/// use courier::{Engine, Request};
/// use std::time::Duration;
///
/// let engine = Engine::new()?;
/// let handle = engine.submit(
///     Request::get("http://example.com/resource")
///         .timeout(Duration::from_secs(15))
///         .header("accept", "application/octet-stream"),
/// )?;
/// handle.wait();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Request {
    pub(crate) url: String,
    pub(crate) method: Method,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) redirect_limit: Option<u32>,
    pub(crate) content: Content,
    pub(crate) output_sink: Option<Box<dyn WriteStream>>,
}

impl Request {
    /// Creates a request with an explicit method.
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Request {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            timeout: None,
            redirect_limit: None,
            content: Content::None,
            output_sink: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Request::new(url, Method::Get)
    }

    /// Creates a POST request. Content must be supplied via [`content`]
    /// or [`content_stream`] before submission.
    ///
    /// [`content`]: Request::content
    /// [`content_stream`]: Request::content_stream
    pub fn post(url: impl Into<String>) -> Self {
        Request::new(url, Method::Post)
    }

    /// Creates a HEAD request.
    pub fn head(url: impl Into<String>) -> Self {
        Request::new(url, Method::Head)
    }

    /// Replaces the request URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the connection-phase timeout. This bounds how long the driver
    /// waits for the connection and response headers, not the whole
    /// transfer; body liveness is governed by the engine's stall timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connection-phase timeout from fractional seconds.
    /// Non-positive values clear the timeout.
    pub fn timeout_secs(mut self, seconds: f32) -> Self {
        self.timeout = if seconds > 0.0 {
            Some(Duration::from_secs_f32(seconds))
        } else {
            None
        };
        self
    }

    /// Appends a header. Setting the same key twice overwrites the earlier
    /// value.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the upload content from an in-memory buffer, replacing any
    /// previously set buffer or stream.
    pub fn content(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.content = Content::Buffer(data.into());
        self
    }

    /// Appends bytes to the in-memory content buffer. If the current
    /// content source is a stream (or absent), it is replaced by a fresh
    /// buffer first.
    pub fn append_content(mut self, data: impl AsRef<[u8]>) -> Self {
        if let Content::Buffer(buffer) = &mut self.content {
            buffer.extend_from_slice(data.as_ref());
        } else {
            self.content = Content::Buffer(data.as_ref().to_vec());
        }
        self
    }

    /// Sets the upload content from a readable stream, replacing any
    /// previously set buffer.
    pub fn content_stream(mut self, stream: impl ReadStream + 'static) -> Self {
        self.content = Content::Stream(Box::new(stream));
        self
    }

    /// Streams the download into `sink` instead of buffering it in the
    /// response state. With a sink set, `content()` on the resolved
    /// response is empty and only the byte counter reflects the download.
    pub fn output_stream(mut self, sink: impl WriteStream + 'static) -> Self {
        self.output_sink = Some(Box::new(sink));
        self
    }

    /// Limits how many redirects are followed. The default is unlimited;
    /// an explicit `0` disables redirect following entirely, so the
    /// redirect response itself becomes the result.
    pub fn redirections(mut self, count: u32) -> Self {
        self.redirect_limit = Some(count);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("redirect_limit", &self.redirect_limit)
            .field("content", &self.content)
            // The sink is an opaque trait object; report only its presence.
            .field("output_sink", &self.output_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryReadStream, MemoryWriteStream};

    #[test]
    fn debug_summarizes_opaque_fields() {
        let req = Request::post("http://example.com")
            .content_stream(MemoryReadStream::new(b"body".to_vec()))
            .output_stream(MemoryWriteStream::new());
        let rendered = format!("{req:?}");
        assert!(rendered.contains("Content::Stream(4 bytes)"));
        assert!(rendered.contains("output_sink: true"));

        let rendered = format!("{:?}", Request::get("http://example.com"));
        assert!(rendered.contains("Content::None"));
        assert!(rendered.contains("output_sink: false"));
    }

    #[test]
    fn header_overwrites_duplicate_key() {
        let req = Request::get("http://example.com")
            .header("x-token", "first")
            .header("x-token", "second");
        assert_eq!(req.headers.get("x-token").map(String::as_str), Some("second"));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn content_setters_are_mutually_exclusive() {
        let req = Request::post("http://example.com")
            .content_stream(MemoryReadStream::new(b"stream".to_vec()))
            .content(b"buffer".to_vec());
        assert!(matches!(req.content, Content::Buffer(ref b) if b == b"buffer"));

        let req = Request::post("http://example.com")
            .content(b"buffer".to_vec())
            .content_stream(MemoryReadStream::new(b"stream".to_vec()));
        assert!(matches!(req.content, Content::Stream(_)));
    }

    #[test]
    fn append_content_extends_buffer() {
        let req = Request::post("http://example.com")
            .content(b"abc".to_vec())
            .append_content(b"def");
        assert!(matches!(req.content, Content::Buffer(ref b) if b == b"abcdef"));
    }

    #[test]
    fn append_content_replaces_stream() {
        let req = Request::post("http://example.com")
            .content_stream(MemoryReadStream::new(b"stream".to_vec()))
            .append_content(b"xyz");
        assert!(matches!(req.content, Content::Buffer(ref b) if b == b"xyz"));
    }

    #[test]
    fn timeout_secs_clears_on_non_positive() {
        let req = Request::get("http://example.com").timeout_secs(1.5);
        assert_eq!(req.timeout, Some(Duration::from_millis(1500)));
        let req = req.timeout_secs(0.0);
        assert_eq!(req.timeout, None);
    }

    #[test]
    fn redirections_default_is_unlimited() {
        let req = Request::get("http://example.com");
        assert_eq!(req.redirect_limit, None);
        let req = req.redirections(0);
        assert_eq!(req.redirect_limit, Some(0));
    }
}
