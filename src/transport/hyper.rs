//! Transport backed by the hyper-util legacy client.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use ::hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::transport::{RoundTripFuture, Transport};

/// Plain-HTTP client transport. Requests must carry an absolute URI.
#[derive(Clone, Debug)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::with_connector(HttpConnector::new())
    }

    /// Fail connection attempts that take longer than `timeout`.
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self::with_connector(connector)
    }

    fn with_connector(connector: HttpConnector) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn round_trip(&self, request: Request<Body>) -> RoundTripFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let response: Response<Incoming> = client.request(request).await?;
            Ok(response.map(Body::new))
        })
    }
}
