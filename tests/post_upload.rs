//! Upload paths: in-memory buffers and streamed content.

use std::io;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;

use courier::{Engine, MemoryReadStream, ReadStream, Request};

#[path = "helpers.rs"]
mod helpers;
use helpers::serve;

fn upload_app() -> Router {
    Router::new()
        .route(
            "/observe",
            post(|headers: HeaderMap, body: Bytes| async move {
                let declared = headers
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("absent")
                    .to_string();
                format!("declared={declared} received={}", body.len())
            }),
        )
        .route("/echo", post(|body: Bytes| async move { body }))
}

#[test]
fn buffer_post_declares_exact_content_length() {
    let server = serve(upload_app());
    let engine = Engine::new().unwrap();

    let payload = vec![b'x'; 4096];
    let handle = engine
        .submit(Request::post(server.url("/observe")).content(payload))
        .unwrap();
    handle.wait();

    assert_eq!(handle.status_code(), Some(200));
    assert_eq!(handle.text(), "declared=4096 received=4096");
    assert_eq!(handle.bytes_sent(), 4096);
}

#[test]
fn buffer_post_round_trips_content() {
    let server = serve(upload_app());
    let engine = Engine::new().unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let handle = engine
        .submit(Request::post(server.url("/echo")).content(payload.clone()))
        .unwrap();
    handle.wait();

    assert_eq!(handle.status_code(), Some(200));
    assert_eq!(handle.content(), payload.as_slice());
    assert_eq!(handle.bytes_received(), 10_000);
}

#[test]
fn stream_post_delivers_every_byte() {
    let server = serve(upload_app());
    let engine = Engine::new().unwrap();

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let handle = engine
        .submit(
            Request::post(server.url("/echo"))
                .content_stream(MemoryReadStream::new(payload.clone())),
        )
        .unwrap();
    handle.wait();

    assert_eq!(handle.status_code(), Some(200));
    assert_eq!(handle.content(), payload.as_slice());
    assert_eq!(handle.bytes_sent(), 100_000);
}

/// Hands out fixed-size chunks with a pause before each one, like a
/// source that generates data on demand.
struct TricklingStream {
    total: u64,
    pos: u64,
    chunk: usize,
    pause: Duration,
}

impl ReadStream for TricklingStream {
    fn length(&self) -> u64 {
        self.total
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = (self.total - self.pos) as usize;
        if remaining == 0 {
            return Ok(0);
        }
        std::thread::sleep(self.pause);
        let n = remaining.min(self.chunk).min(buf.len());
        buf[..n].fill(b'z');
        self.pos += n as u64;
        Ok(n)
    }
}

#[test]
fn slow_stream_upload_outlives_the_connection_timeout() {
    let server = serve(upload_app());
    let engine = Engine::new().unwrap();

    // Six chunks, 150 ms apart: the upload takes ~900 ms end to end, but
    // the connection to the local stub is up within milliseconds. The
    // 400 ms timeout bounds connection establishment only, so a steadily
    // progressing upload must never trip it.
    let handle = engine
        .submit(
            Request::post(server.url("/echo"))
                .timeout(Duration::from_millis(400))
                .content_stream(TricklingStream {
                    total: 6 * 1024,
                    pos: 0,
                    chunk: 1024,
                    pause: Duration::from_millis(150),
                }),
        )
        .unwrap();
    handle.wait();

    assert_eq!(handle.status_code(), Some(200));
    assert_eq!(handle.bytes_sent(), 6 * 1024);
    assert_eq!(handle.content().len(), 6 * 1024);
}

#[test]
fn appended_content_is_sent_as_one_buffer() {
    let server = serve(upload_app());
    let engine = Engine::new().unwrap();

    let handle = engine
        .submit(
            Request::post(server.url("/echo"))
                .content(b"first,".to_vec())
                .append_content(b"second"),
        )
        .unwrap();
    handle.wait();

    assert_eq!(handle.text(), "first,second");
}
