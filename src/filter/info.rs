//! Per-call views of the request or response a filter works on.
//!
//! A view is rebuilt on every filter invocation and carries no state of its
//! own between calls. Header edits persist because they land in the
//! underlying request, or in the response's `SharedHeaders`.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use bytes::Bytes;

use crate::lifecycle::Context;

/// View of the inbound request handed to request filters.
pub struct RequestInfo<'a> {
    ctx: &'a Context,
    request: &'a mut Request<Body>,
    replaced: Option<Bytes>,
}

impl<'a> RequestInfo<'a> {
    pub fn new(ctx: &'a Context, request: &'a mut Request<Body>) -> Self {
        Self {
            ctx,
            request,
            replaced: None,
        }
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.request.headers_mut()
    }

    /// First value of `name`, if present and valid UTF-8.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.request
            .headers()
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Replace the request body. The replacement is held in memory.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        let body = body.into();
        *self.request.body_mut() = Body::from(body.clone());
        self.replaced = Some(body);
    }

    /// Replace the request body with everything `reader` yields.
    pub fn set_body_reader(&mut self, mut reader: impl Read) -> io::Result<()> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.set_body(buf);
        Ok(())
    }

    /// The replacement body set during this call, if any.
    pub fn body_buffer(&self) -> Option<&Bytes> {
        self.replaced.as_ref()
    }

    /// Consume the view, returning the replacement set during this call.
    pub(crate) fn into_replacement(self) -> Option<Bytes> {
        self.replaced
    }
}

/// Response headers shared between a streaming worker and the response.
///
/// Stored in the response's extensions. When the proxy hands the finished
/// head to the worker the map is replaced by the head's headers, after
/// hop-by-hop removal and every modifier ran, so stream filters start from
/// exactly what the client is sent. Edits made while the body flows stay
/// visible to every holder of the handle; the head is on the wire by then,
/// so they never reach the client. There is no isolation beyond the mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedHeaders(Arc<Mutex<HeaderMap>>);

impl SharedHeaders {
    pub fn new(headers: HeaderMap) -> Self {
        Self(Arc::new(Mutex::new(headers)))
    }

    pub fn lock(&self) -> MutexGuard<'_, HeaderMap> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<HeaderValue> {
        self.lock().get(name.as_ref()).cloned()
    }

    pub fn snapshot(&self) -> HeaderMap {
        self.lock().clone()
    }
}

/// View of the in-flight response handed to stream filters.
pub struct ResponseInfo<'a> {
    ctx: &'a Context,
    status: StatusCode,
    headers: &'a SharedHeaders,
}

impl<'a> ResponseInfo<'a> {
    pub fn new(ctx: &'a Context, status: StatusCode, headers: &'a SharedHeaders) -> Self {
        Self { ctx, status, headers }
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Lock the shared header map for reading or editing.
    ///
    /// The lock is not reentrant: drop the guard before calling
    /// [`header`](Self::header) or [`append_header`](Self::append_header),
    /// which lock it again. Prefer those two for single edits.
    pub fn headers(&self) -> MutexGuard<'_, HeaderMap> {
        self.headers.lock()
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<HeaderValue> {
        self.headers.get(name)
    }

    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.headers.lock().append(name, value);
    }
}
