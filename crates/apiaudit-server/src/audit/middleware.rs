//! Audit middleware
//!
//! Wraps services so that every request passing through is audited:
//! - the request info is taken from an upstream extension or resolved here
//! - the event is built before the handler runs
//! - the response body is wrapped so each frame is mirrored into a
//!   [`ResponseCapture`] as it streams to the client
//! - the event is finalized and queued once the body ends or is dropped

use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use apiaudit_common::types::Level;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::StatusCode,
    response::Response,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tower::{Layer, Service};
use tracing::{debug, trace};

use super::auditor::{AuditDecision, Auditor};
use super::capture::{ResponseCapture, ResponseWriter};
use crate::request::{RequestInfo, RequestInfoResolver};

/// Audit layer
#[derive(Clone)]
pub struct AuditLayer {
    auditor: Auditor,
    resolver: RequestInfoResolver,
}

impl AuditLayer {
    pub fn new(auditor: Auditor) -> Self {
        Self {
            auditor,
            resolver: RequestInfoResolver::new(),
        }
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditMiddleware {
            inner,
            auditor: self.auditor.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Audit middleware service
#[derive(Clone)]
pub struct AuditMiddleware<S> {
    inner: S,
    auditor: Auditor,
    resolver: RequestInfoResolver,
}

impl<S> Service<Request> for AuditMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone is not guaranteed ready; swap so the polled service runs.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let auditor = self.auditor.clone();
        let resolver = self.resolver.clone();

        Box::pin(async move {
            let level = auditor.level();
            if !level.greater_or_equal(Level::Metadata) {
                return inner.call(request).await;
            }

            let info = match request.extensions().get::<RequestInfo>() {
                Some(info) => info.clone(),
                None => resolver.resolve(request.method(), request.uri()),
            };

            // The Kubernetes API server audits its own requests when enabled.
            if info.is_kubernetes_request && auditor.k8s_auditing_enabled() {
                trace!(path = %info.path, "kubernetes request audited upstream");
                return inner.call(request).await;
            }

            let (request, decision) = auditor.log_request_at(level, request, &info).await;
            let response = inner.call(request).await?;

            if !decision.is_audited() {
                return Ok(response);
            }

            debug!(
                path = %info.path,
                verb = %info.verb,
                status = %response.status(),
                "Audited request handled"
            );

            Ok(AuditedBody::wrap(response, auditor, decision))
        })
    }
}

/// [`ResponseWriter`] standing in for the streaming response body.
///
/// Frames are yielded to the client by [`AuditedBody`] itself, so writes are
/// only acknowledged and counted here.
#[derive(Debug, Default)]
pub struct FrameWriter {
    status: Option<StatusCode>,
    written: u64,
}

impl FrameWriter {
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl ResponseWriter for FrameWriter {
    fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.written += data.len() as u64;
        Ok(data.len())
    }
}

struct Pending {
    auditor: Auditor,
    decision: AuditDecision,
    capture: ResponseCapture<FrameWriter>,
}

impl Pending {
    fn finish(self) {
        trace!(bytes = self.capture.get_ref().written(), "response finished, queueing audit event");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let finalizers = self.auditor.finalizers().clone();
                finalizers.spawn_on(
                    async move {
                        self.auditor.log_response(self.decision, &self.capture).await;
                    },
                    &handle,
                );
            },
            Err(e) => debug!(error = %e, "no runtime to finalize audit event, event dropped"),
        }
    }
}

/// Response body that records what it streams.
///
/// The audit event is finalized exactly once: at end of stream, on a body
/// error, or when the body is dropped early (client gone). Finalization runs
/// on a task tracked by the [`Auditor`]; [`Auditor::flush`] waits for it.
pub struct AuditedBody {
    inner: Body,
    pending: Option<Pending>,
}

impl AuditedBody {
    /// Wrap the body of an audited response
    pub fn wrap(response: Response, auditor: Auditor, decision: AuditDecision) -> Response {
        let level = decision.event().map(|e| e.level).unwrap_or_default();
        let (parts, body) = response.into_parts();

        let mut capture = if level.greater_or_equal(Level::RequestResponse) {
            ResponseCapture::new(FrameWriter::default())
        } else {
            ResponseCapture::without_body(FrameWriter::default())
        };
        capture.write_header(parts.status);

        let mut audited = Self {
            inner: body,
            pending: Some(Pending {
                auditor,
                decision,
                capture,
            }),
        };
        if audited.inner.is_end_stream() {
            audited.finish();
        }

        Response::from_parts(parts, Body::new(audited))
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.finish();
        }
    }
}

impl HttpBody for AuditedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(pending)) = (frame.data_ref(), this.pending.as_mut()) {
                    if let Err(e) = pending.capture.write(data) {
                        trace!(error = %e, "failed to mirror response frame");
                    }
                }
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            },
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            },
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for AuditedBody {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                bytes = pending.capture.get_ref().written(),
                "response body dropped before end of stream"
            );
            pending.finish();
        }
    }
}
