//! Transport that never leaves the process.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};

use crate::transport::{RoundTripFuture, Transport};

/// Answers every round trip with an empty response of a fixed status.
///
/// Installed by the composition layer when a proxy has no director.
#[derive(Debug, Clone, Copy)]
pub struct NoopTransport {
    status: StatusCode,
}

impl NoopTransport {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl Default for NoopTransport {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Transport for NoopTransport {
    fn round_trip(&self, _request: Request<Body>) -> RoundTripFuture {
        let status = self.status;
        Box::pin(async move {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_empty() {
        let response = NoopTransport::default()
            .round_trip(Request::new(Body::from("ignored")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
