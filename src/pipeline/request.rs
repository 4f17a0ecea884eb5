//! Request pipeline.
//!
//! # Responsibilities
//! - Run request filters in declared order before the wrapped service
//! - Turn a filter error into a 400 JSON response
//! - Answer with the filter's own response when it intercepts
//! - Fix up `Content-Length` after a filter replaced the body
//!
//! # Design Decisions
//! - Filters run synchronously inside `call`; the inner service is only
//!   called once every filter returned `Continue`
//! - One `ResponseSink` per request, shared by all filters, like a single
//!   response writer would be
//! - The inner service's readiness is only claimed for requests that are
//!   forwarded (`oneshot` on a clone), never for intercepted ones
//! - The forwarded response head is final here, so a held streaming worker
//!   is released once the staged headers are applied

use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use tower::{Layer, Service, ServiceExt};

use crate::filter::{PipelineError, RequestFilter, RequestInfo, Signal};
use crate::http::response::filter_error_response;
use crate::lifecycle::Context;
use crate::observability::metrics;
use crate::pipeline::stream::release_head;

/// Where a request filter writes the response it intercepts with.
///
/// An untouched sink turns into an empty `200 OK`. Headers set here by a
/// filter that then continues are added to the inner service's response.
#[derive(Debug, Default)]
pub struct ResponseSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Option<Body>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = Some(status);
        self
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&mut self, body: impl Into<Body>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// Write a complete plain-text error response.
    pub fn error(&mut self, status: StatusCode, message: impl Into<String>) -> &mut Self {
        self.headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.status(status).body(message.into())
    }

    pub fn is_written(&self) -> bool {
        self.status.is_some() || self.body.is_some()
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(self.body.unwrap_or_default());
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }

    fn apply_headers(headers: HeaderMap, response: &mut Response<Body>) {
        let mut last_name = None;
        for (name, value) in headers {
            if let Some(name) = name {
                last_name = Some(name);
            }
            if let Some(name) = &last_name {
                response.headers_mut().append(name.clone(), value);
            }
        }
    }
}

/// What a filter pass decided.
enum Outcome {
    Forward(Request<Body>, HeaderMap),
    Respond(Response<Body>),
}

/// `tower::Layer` running request filters in front of a service.
#[derive(Clone)]
pub struct RequestFilterLayer {
    ctx: Context,
    filters: Arc<[Arc<dyn RequestFilter>]>,
}

impl RequestFilterLayer {
    pub fn new(ctx: Context, filters: Vec<Arc<dyn RequestFilter>>) -> Self {
        Self {
            ctx,
            filters: filters.into(),
        }
    }
}

impl<S> Layer<S> for RequestFilterLayer {
    type Service = RequestFilterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestFilterService {
            inner,
            ctx: self.ctx.clone(),
            filters: Arc::clone(&self.filters),
        }
    }
}

/// Service produced by [`RequestFilterLayer`].
#[derive(Clone)]
pub struct RequestFilterService<S> {
    inner: S,
    ctx: Context,
    filters: Arc<[Arc<dyn RequestFilter>]>,
}

impl<S> RequestFilterService<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn run_filters(&self, mut request: Request<Body>) -> Outcome {
        let _entered = self.ctx.span().enter();
        let mut sink = ResponseSink::new();

        for filter in self.filters.iter() {
            let mut info = RequestInfo::new(&self.ctx, &mut request);
            let result = filter.on_request(&self.ctx, &mut sink, &mut info);
            let replacement = info.into_replacement();

            match result {
                Err(source) => {
                    let response = filter_error_response(&source);
                    let err = PipelineError::RequestFilter {
                        filter: filter.name(),
                        source,
                    };
                    tracing::warn!(error = %err, "Request rejected by filter");
                    metrics::record_request_filter("error");
                    return Outcome::Respond(response);
                }
                Ok(Signal::Intercept) => {
                    tracing::debug!(filter = filter.name(), "Request intercepted");
                    metrics::record_request_filter("intercept");
                    return Outcome::Respond(sink.into_response());
                }
                Ok(Signal::Continue) => {
                    if let Some(body) = replacement {
                        set_body_length(&mut request, &body);
                    }
                }
            }
        }

        metrics::record_request_filter("continue");
        Outcome::Forward(request, sink.headers)
    }
}

fn set_body_length(request: &mut Request<Body>, body: &Bytes) {
    let headers = request.headers_mut();
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
}

impl<S> Service<Request<Body>> for RequestFilterService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<Body>, S::Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of `inner` is awaited in `call`, per forwarded request.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        match self.run_filters(request) {
            Outcome::Respond(response) => Box::pin(future::ready(Ok(response))),
            Outcome::Forward(request, staged) => {
                let inner = self.inner.clone();
                Box::pin(async move {
                    let mut response = inner.oneshot(request).await?;
                    ResponseSink::apply_headers(staged, &mut response);
                    release_head(&mut response);
                    Ok(response)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterError;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::BoxCloneService;
    use tower::ServiceExt;

    /// Appends its tag to `x-trace` and optionally swaps the body.
    struct Trace {
        tag: &'static str,
        body: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Trace {
        fn new(tag: &'static str) -> Arc<Self> {
            Arc::new(Self { tag, body: None, calls: AtomicUsize::new(0) })
        }

        fn with_body(tag: &'static str, body: &'static str) -> Arc<Self> {
            Arc::new(Self { tag, body: Some(body), calls: AtomicUsize::new(0) })
        }
    }

    impl RequestFilter for Trace {
        fn on_request(
            &self,
            _ctx: &Context,
            _sink: &mut ResponseSink,
            info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            info.headers_mut().append("x-trace", HeaderValue::from_static(self.tag));
            if let Some(body) = self.body {
                info.set_body(body);
            }
            Ok(Signal::Continue)
        }
    }

    struct RequireAppKey;

    impl RequestFilter for RequireAppKey {
        fn on_request(
            &self,
            _ctx: &Context,
            sink: &mut ResponseSink,
            info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            if info.header("app-key").is_none() {
                sink.error(StatusCode::UNAUTHORIZED, "appKey in header is missing");
                return Ok(Signal::Intercept);
            }
            Ok(Signal::Continue)
        }
    }

    struct Reject;

    impl RequestFilter for Reject {
        fn on_request(
            &self,
            _ctx: &Context,
            _sink: &mut ResponseSink,
            _info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            Err(FilterError::new("tenant is suspended"))
        }
    }

    struct StageHeader;

    impl RequestFilter for StageHeader {
        fn on_request(
            &self,
            _ctx: &Context,
            sink: &mut ResponseSink,
            _info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            sink.header(HeaderName::from_static("x-filtered"), HeaderValue::from_static("yes"));
            Ok(Signal::Continue)
        }
    }

    /// Echoes `x-trace`, `content-length` and the body back.
    fn echo(handled: Arc<AtomicUsize>) -> BoxCloneService<Request<Body>, Response<Body>, Infallible> {
        BoxCloneService::new(tower::service_fn(move |req: Request<Body>| {
            let handled = Arc::clone(&handled);
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                let trace: Vec<_> = req
                    .headers()
                    .get_all("x-trace")
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(str::to_owned)
                    .collect();
                let length = req
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_owned();
                let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
                let text = format!("{}|{}|{}", trace.join(","), length, String::from_utf8_lossy(&body));
                Ok::<_, Infallible>(Response::new(Body::from(text)))
            }
        }))
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn layer(filters: Vec<Arc<dyn RequestFilter>>) -> RequestFilterLayer {
        RequestFilterLayer::new(Context::background(), filters)
    }

    #[tokio::test]
    async fn continue_applies_mutations_in_order() {
        let handled = Arc::new(AtomicUsize::new(0));
        let service = layer(vec![
            Trace::with_body("a", "first"),
            Trace::new("b"),
            Trace::with_body("c", "second!!"),
        ])
        .layer(echo(Arc::clone(&handled)));

        let request = Request::builder()
            .header(TRANSFER_ENCODING, "chunked")
            .body(Body::from("original body"))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "a,b,c|8|second!!");
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn untouched_body_keeps_its_length() {
        let service = layer(vec![Trace::new("only")]).layer(echo(Arc::new(AtomicUsize::new(0))));
        let request = Request::builder().body(Body::from("abc")).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "only|-|abc");
    }

    #[tokio::test]
    async fn intercept_returns_filter_response_only() {
        let handled = Arc::new(AtomicUsize::new(0));
        let after = Trace::new("after");
        let service = layer(vec![Arc::new(RequireAppKey), after.clone()])
            .layer(echo(Arc::clone(&handled)));

        let response = service
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "appKey in header is missing");
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn app_key_present_continues() {
        let handled = Arc::new(AtomicUsize::new(0));
        let service = layer(vec![Arc::new(RequireAppKey)]).layer(echo(Arc::clone(&handled)));
        let request = Request::builder().header("App-Key", "k").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_yields_bad_request_json() {
        let handled = Arc::new(AtomicUsize::new(0));
        let before = Trace::new("before");
        let after = Trace::new("after");
        let service = layer(vec![before.clone(), Arc::new(Reject), after.clone()])
            .layer(echo(Arc::clone(&handled)));

        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Bad Request");
        assert_eq!(json["error"], "tenant is suspended");

        assert_eq!(before.calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn staged_headers_reach_forwarded_response() {
        let service = layer(vec![Arc::new(StageHeader)]).layer(echo(Arc::new(AtomicUsize::new(0))));
        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.headers()["x-filtered"], "yes");
    }

    #[tokio::test]
    async fn silent_intercept_is_empty_ok() {
        struct Swallow;
        impl RequestFilter for Swallow {
            fn on_request(
                &self,
                _ctx: &Context,
                _sink: &mut ResponseSink,
                _info: &mut RequestInfo<'_>,
            ) -> Result<Signal, FilterError> {
                Ok(Signal::Intercept)
            }
        }

        let handled = Arc::new(AtomicUsize::new(0));
        let service = layer(vec![Arc::new(Swallow)]).layer(echo(Arc::clone(&handled)));
        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_empty());
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    /// Counts readiness checks; answers `204`.
    #[derive(Clone, Default)]
    struct ReadyCounter {
        polls: Arc<AtomicUsize>,
    }

    impl Service<Request<Body>> for ReadyCounter {
        type Response = Response<Body>;
        type Error = Infallible;
        type Future = future::Ready<Result<Response<Body>, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Infallible>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request<Body>) -> Self::Future {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            future::ready(Ok(response))
        }
    }

    #[tokio::test]
    async fn inner_readiness_claimed_only_when_forwarding() {
        let inner = ReadyCounter::default();
        let polls = Arc::clone(&inner.polls);
        let mut service = layer(vec![Arc::new(RequireAppKey)]).layer(inner);

        let response = service
            .ready()
            .await
            .unwrap()
            .call(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(polls.load(Ordering::SeqCst), 0);

        let request = Request::builder().header("App-Key", "k").body(Body::empty()).unwrap();
        let response = service.ready().await.unwrap().call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }
}
