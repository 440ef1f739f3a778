// Shared test helpers: local stub servers and common fixtures.
//
// The engine's API is synchronous, so stubs run on their own background
// runtime thread and tests stay plain #[test] functions.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Once};

use axum::Router;
use tokio::net::TcpListener;

use courier::WriteStream;

static LOG_INIT: Once = Once::new();

/// Routes engine logs through the test harness; set `RUST_LOG` to see
/// driver activity while debugging a test.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A stub HTTP server bound to an ephemeral localhost port.
pub struct StubServer {
    addr: SocketAddr,
}

impl StubServer {
    /// Base URL of the stub, e.g. `http://127.0.0.1:49152`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Serves `app` on a background thread for the remainder of the test
/// process.
#[allow(dead_code)] // Used by other test files
pub fn serve(app: Router) -> StubServer {
    init_logging();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("failed to build stub runtime");
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind stub listener");
            tx.send(listener.local_addr().expect("stub has no local addr"))
                .expect("stub address receiver dropped");
            axum::serve(listener, app).await.expect("stub server failed");
        });
    });
    let addr = rx.recv().expect("stub server did not start");
    StubServer { addr }
}

/// A listener that accepts connections and never answers, for
/// connection-phase timeout tests.
#[allow(dead_code)] // Used by other test files
pub fn serve_black_hole() -> StubServer {
    init_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind black hole");
    let addr = listener.local_addr().expect("black hole has no local addr");
    std::thread::spawn(move || {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept() {
            // Keep the socket open without ever writing a byte.
            held.push(socket);
        }
    });
    StubServer { addr }
}

/// A `WriteStream` sink whose collected bytes stay observable from the
/// test after the sink itself has moved into the request.
#[allow(dead_code)] // Used by other test files
#[derive(Clone, Default)]
pub struct SharedSink {
    data: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)] // Used by other test files
impl SharedSink {
    pub fn new() -> Self {
        SharedSink::default()
    }

    pub fn collected(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl WriteStream for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}
