//! Stream capabilities consumed by the engine.
//!
//! The engine does not define a general byte-stream abstraction; it only
//! requires a sequential readable source for uploads and a writable sink
//! for streamed downloads. Both cross onto the driver thread, so both are
//! `Send`.

use std::io;
use std::io::Write;

/// A sequential, length-aware byte source used as an upload body.
///
/// The engine pulls chunks in order and never seeks. Implementations must
/// keep `tell()` consistent with the number of bytes handed out so far;
/// the upload path asserts this invariant before every read, because a
/// drifting cursor means the implementation is broken, not that I/O failed.
pub trait ReadStream: Send {
    /// Total number of bytes this stream will produce.
    fn length(&self) -> u64;

    /// Current cursor position, i.e. bytes already read.
    fn tell(&self) -> u64;

    /// Reads up to `buf.len()` bytes, returning the number read.
    /// Returning `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// A byte sink receiving download content as it arrives.
///
/// When a request carries an output sink, downloaded bytes are forwarded
/// here and only counted, never buffered in the response state. Writes run
/// on the driver thread; a failed write aborts the transfer.
pub trait WriteStream: Send {
    /// Writes the whole buffer, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// In-memory [`ReadStream`] over an owned byte vector.
#[derive(Debug)]
pub struct MemoryReadStream {
    data: Vec<u8>,
    pos: u64,
}

impl MemoryReadStream {
    /// Wraps `data` as a readable stream starting at offset 0.
    pub fn new(data: Vec<u8>) -> Self {
        MemoryReadStream { data, pos: 0 }
    }
}

impl ReadStream for MemoryReadStream {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos as usize..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

/// In-memory [`WriteStream`] collecting everything written to it.
///
/// Mainly useful for tests and for callers that want sink semantics with
/// post-hoc inspection.
#[derive(Debug, Default)]
pub struct MemoryWriteStream {
    data: Vec<u8>,
}

impl MemoryWriteStream {
    /// Creates an empty sink.
    pub fn new() -> Self {
        MemoryWriteStream::default()
    }

    /// Consumes the sink and returns the collected bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl WriteStream for MemoryWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.write(buf)
    }
}
