//! Response capture
//!
//! [`ResponseCapture`] sits between a handler and the real response writer.
//! Every write is forwarded untouched and mirrored into a buffer, and the
//! first committed status is latched so the audit event can report it once
//! the handler has finished.
//!
//! Writers may additionally support connection takeover ([`Hijack`]) or
//! client-disconnect notification ([`CloseNotify`]). The capture exposes the
//! same capabilities by delegating to the wrapped writer, and reports
//! [`CaptureError::Unsupported`] when the writer lacks them.

use std::io;

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Optional writer capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Hijack,
    CloseNotify,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Hijack => write!(f, "hijack"),
            Capability::CloseNotify => write!(f, "close notification"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("response writer does not support {0}")]
    Unsupported(Capability),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Raw client connection handed over by a hijack
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Connection takeover. After a successful hijack the caller owns the
/// connection and the writer must not be used again.
pub trait Hijack {
    fn hijack(&mut self) -> Result<Box<dyn Connection>, CaptureError>;
}

/// Client disconnect notification
pub trait CloseNotify {
    /// Token cancelled once the client has gone away
    fn close_notify(&mut self) -> CancellationToken;
}

/// Sink for a response: status line first, then body bytes.
pub trait ResponseWriter {
    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        None
    }

    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        None
    }
}

/// Records status and body of everything written through it.
#[derive(Debug)]
pub struct ResponseCapture<W> {
    inner: W,
    wrote_header: bool,
    status: Option<StatusCode>,
    body: BytesMut,
    record_body: bool,
}

impl<W: ResponseWriter> ResponseCapture<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            wrote_header: false,
            status: None,
            body: BytesMut::new(),
            record_body: true,
        }
    }

    /// Capture that latches the status but keeps no copy of the body
    pub fn without_body(inner: W) -> Self {
        Self {
            record_body: false,
            ..Self::new(inner)
        }
    }

    /// Commit the status. Only the first call reaches the wrapped writer.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.wrote_header {
            return;
        }
        self.status = Some(status);
        self.inner.write_header(status);
        self.wrote_header = true;
    }

    /// Forward `data`, committing `200 OK` first if no status was written.
    ///
    /// The wrapped writer's result is returned as-is.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_header(StatusCode::OK);
        if self.record_body {
            self.body.extend_from_slice(data);
        }
        self.inner.write(data)
    }

    pub fn header_written(&self) -> bool {
        self.wrote_header
    }

    /// Committed status; a response that never wrote anything is a `200 OK`.
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Cheap copy of the recorded body
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    pub fn hijack(&mut self) -> Result<Box<dyn Connection>, CaptureError> {
        match self.inner.hijacker() {
            Some(hijacker) => hijacker.hijack(),
            None => Err(CaptureError::Unsupported(Capability::Hijack)),
        }
    }

    pub fn close_notify(&mut self) -> Result<CancellationToken, CaptureError> {
        match self.inner.close_notifier() {
            Some(notifier) => Ok(notifier.close_notify()),
            None => Err(CaptureError::Unsupported(Capability::CloseNotify)),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for ResponseCapture<W> {
    fn write_header(&mut self, status: StatusCode) {
        ResponseCapture::write_header(self, status);
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        ResponseCapture::write(self, data)
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        self.inner.hijacker()
    }

    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        self.inner.close_notifier()
    }
}
