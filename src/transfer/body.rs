//! Upload body built from a caller-supplied readable stream.
//!
//! The transport pulls chunks from this iterator on the driver thread.
//! A panic inside the caller's `ReadStream` implementation is caught at
//! this boundary and converted into an I/O error that aborts the transfer;
//! letting it unwind through the transport is not an option.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use log::warn;

use crate::config::UPLOAD_CHUNK_SIZE;
use crate::response::ResponseState;
use crate::stream::ReadStream;
use crate::transfer::ActivityClock;

pub(crate) struct UploadStream {
    source: Box<dyn ReadStream>,
    state: Arc<ResponseState>,
    activity: Arc<ActivityClock>,
    produced: u64,
}

impl UploadStream {
    pub(crate) fn new(
        source: Box<dyn ReadStream>,
        state: Arc<ResponseState>,
        activity: Arc<ActivityClock>,
    ) -> Self {
        UploadStream {
            source,
            state,
            activity,
            produced: 0,
        }
    }

    /// Wraps the stream into a transport body.
    pub(crate) fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(futures::stream::iter(self))
    }
}

impl Iterator for UploadStream {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.cancel_requested() {
            return Some(Err(io::Error::other("transfer canceled during upload")));
        }

        // A sequential source resuming anywhere other than the number of
        // bytes already handed to the transport is a broken stream
        // implementation, not a recoverable I/O condition.
        assert_eq!(
            self.produced,
            self.source.tell(),
            "upload stream cursor out of sync with bytes already sent"
        );

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let read = catch_unwind(AssertUnwindSafe(|| self.source.read(&mut buf)));
        match read {
            Err(_) => {
                warn!("upload stream panicked; aborting transfer");
                Some(Err(io::Error::other("upload stream panicked")))
            }
            Ok(Err(err)) => Some(Err(err)),
            Ok(Ok(0)) => None,
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.produced += n as u64;
                self.state.add_bytes_sent(n as u64);
                self.activity.mark();
                Some(Ok(Bytes::from(buf)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryReadStream;

    fn upload(source: impl ReadStream + 'static) -> UploadStream {
        UploadStream::new(
            Box::new(source),
            ResponseState::new(),
            ActivityClock::new(),
        )
    }

    #[test]
    fn yields_all_bytes_then_ends() {
        let mut stream = upload(MemoryReadStream::new(b"abcdef".to_vec()));
        let chunk = stream.next().unwrap().unwrap();
        assert_eq!(&chunk[..], b"abcdef");
        assert!(stream.next().is_none());
        assert_eq!(stream.state.bytes_sent(), 6);
    }

    #[test]
    fn cancellation_aborts_upload() {
        let mut stream = upload(MemoryReadStream::new(b"abcdef".to_vec()));
        stream.state.request_cancel();
        assert!(stream.next().unwrap().is_err());
    }

    #[test]
    fn source_panic_becomes_io_error() {
        struct PanickyStream;
        impl ReadStream for PanickyStream {
            fn length(&self) -> u64 {
                4
            }
            fn tell(&self) -> u64 {
                0
            }
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                panic!("caller bug")
            }
        }

        let mut stream = upload(PanickyStream);
        assert!(stream.next().unwrap().is_err());
    }

    #[test]
    #[should_panic(expected = "out of sync")]
    fn drifting_cursor_is_fatal() {
        struct DriftingStream;
        impl ReadStream for DriftingStream {
            fn length(&self) -> u64 {
                8
            }
            fn tell(&self) -> u64 {
                3 // never matches bytes produced
            }
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }

        let _ = upload(DriftingStream).next();
    }
}
