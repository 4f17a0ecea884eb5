//! Filter capability model.
//!
//! # Data Flow
//! ```text
//! [Arc<dyn Filter>] (declared order, closest to the caller first)
//!     → FilterChains::classify
//!         → request:  RequestFilter-capable, declared order
//!         → stream:   ResponseStreamFilter-capable, reverse order
//!         → modifier: ResponseModifierFilter-capable, reverse order
//! ```
//!
//! # Design Decisions
//! - Three narrow traits instead of one wide one; a type implements any subset
//! - `Filter` only answers "which capabilities do you have", once, at
//!   composition time
//! - Response-side chains run in reverse so the filter declared first is
//!   also the last to touch the response (onion layering)

pub mod error;
pub mod info;
pub mod recording;

use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;

use crate::lifecycle::Context;
use crate::pipeline::request::ResponseSink;

pub use error::{FilterError, PipelineError, StreamPhase};
pub use info::{RequestInfo, ResponseInfo, SharedHeaders};
pub use recording::RecordingFilter;

/// Whether a pipeline should go on to its next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Intercept,
}

/// Runs against the inbound request before it is forwarded.
pub trait RequestFilter: Send + Sync {
    /// Inspect or edit the request.
    ///
    /// Returning `Intercept` ends the request; whatever was written to
    /// `sink` is the response. Returning an error ends it with a 400.
    fn on_request(
        &self,
        ctx: &Context,
        sink: &mut ResponseSink,
        info: &mut RequestInfo<'_>,
    ) -> Result<Signal, FilterError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Transforms the response body one chunk at a time.
///
/// Whatever is written to `writer` becomes the next filter's chunk. The
/// chunk may be edited in place; it cannot outlive the call.
pub trait ResponseStreamFilter: Send + Sync {
    /// Called for every chunk read from upstream.
    ///
    /// The returned `Signal` does not stop the chain; only an error does.
    fn on_response_chunk(
        &self,
        ctx: &Context,
        info: &ResponseInfo<'_>,
        writer: &mut dyn Write,
        chunk: &mut [u8],
    ) -> Result<Signal, FilterError>;

    /// Called once when upstream is exhausted, with an empty chunk from the
    /// first filter and the previous filter's flush output after that.
    fn on_response_eof(
        &self,
        ctx: &Context,
        info: &ResponseInfo<'_>,
        writer: &mut dyn Write,
        chunk: &mut [u8],
    ) -> Result<(), FilterError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Edits response metadata once the round trip returned.
pub trait ResponseModifierFilter: Send + Sync {
    fn modify(&self, ctx: &Context, response: &mut Response<Body>) -> Result<(), FilterError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A filter of any capability mix.
///
/// Each accessor returns the filter as that capability, or `None`. Use
/// [`filter_capabilities!`](crate::filter_capabilities) to implement it.
pub trait Filter: Send + Sync + 'static {
    fn request_filter(self: Arc<Self>) -> Option<Arc<dyn RequestFilter>> {
        None
    }

    fn stream_filter(self: Arc<Self>) -> Option<Arc<dyn ResponseStreamFilter>> {
        None
    }

    fn modifier_filter(self: Arc<Self>) -> Option<Arc<dyn ResponseModifierFilter>> {
        None
    }
}

/// Implement [`Filter`] for a type from the capabilities it has.
///
/// ```ignore
/// filter_capabilities!(AuthFilter: request, modifier);
/// ```
#[macro_export]
macro_rules! filter_capabilities {
    ($ty:ty: $($cap:ident),+ $(,)?) => {
        impl $crate::filter::Filter for $ty {
            $( $crate::filter_capabilities!(@accessor $cap); )+
        }
    };
    (@accessor request) => {
        fn request_filter(
            self: ::std::sync::Arc<Self>,
        ) -> ::std::option::Option<::std::sync::Arc<dyn $crate::filter::RequestFilter>> {
            ::std::option::Option::Some(self)
        }
    };
    (@accessor stream) => {
        fn stream_filter(
            self: ::std::sync::Arc<Self>,
        ) -> ::std::option::Option<::std::sync::Arc<dyn $crate::filter::ResponseStreamFilter>> {
            ::std::option::Option::Some(self)
        }
    };
    (@accessor modifier) => {
        fn modifier_filter(
            self: ::std::sync::Arc<Self>,
        ) -> ::std::option::Option<::std::sync::Arc<dyn $crate::filter::ResponseModifierFilter>> {
            ::std::option::Option::Some(self)
        }
    };
}

/// The three ordered chains derived from one declared filter list.
#[derive(Clone, Default)]
pub struct FilterChains {
    pub request: Vec<Arc<dyn RequestFilter>>,
    pub stream: Vec<Arc<dyn ResponseStreamFilter>>,
    pub modifier: Vec<Arc<dyn ResponseModifierFilter>>,
}

impl FilterChains {
    /// Split `filters` by capability. Filters lacking a capability are
    /// skipped for that chain.
    pub fn classify(filters: &[Arc<dyn Filter>]) -> Self {
        Self {
            request: filters
                .iter()
                .filter_map(|f| Arc::clone(f).request_filter())
                .collect(),
            stream: filters
                .iter()
                .rev()
                .filter_map(|f| Arc::clone(f).stream_filter())
                .collect(),
            modifier: filters
                .iter()
                .rev()
                .filter_map(|f| Arc::clone(f).modifier_filter())
                .collect(),
        }
    }
}

impl std::fmt::Debug for FilterChains {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChains")
            .field("request", &self.request.iter().map(|x| x.name()).collect::<Vec<_>>())
            .field("stream", &self.stream.iter().map(|x| x.name()).collect::<Vec<_>>())
            .field("modifier", &self.modifier.iter().map(|x| x.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged {
        tag: &'static str,
    }

    impl RequestFilter for Tagged {
        fn on_request(
            &self,
            _ctx: &Context,
            _sink: &mut ResponseSink,
            _info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            Ok(Signal::Continue)
        }

        fn name(&self) -> &'static str {
            self.tag
        }
    }

    impl ResponseStreamFilter for Tagged {
        fn on_response_chunk(
            &self,
            _ctx: &Context,
            _info: &ResponseInfo<'_>,
            writer: &mut dyn Write,
            chunk: &mut [u8],
        ) -> Result<Signal, FilterError> {
            writer.write_all(chunk)?;
            Ok(Signal::Continue)
        }

        fn on_response_eof(
            &self,
            _ctx: &Context,
            _info: &ResponseInfo<'_>,
            _writer: &mut dyn Write,
            _chunk: &mut [u8],
        ) -> Result<(), FilterError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.tag
        }
    }

    struct RequestOnly;

    impl RequestFilter for RequestOnly {
        fn on_request(
            &self,
            _ctx: &Context,
            _sink: &mut ResponseSink,
            _info: &mut RequestInfo<'_>,
        ) -> Result<Signal, FilterError> {
            Ok(Signal::Continue)
        }

        fn name(&self) -> &'static str {
            "B"
        }
    }

    struct ModifierOnly;

    impl ResponseModifierFilter for ModifierOnly {
        fn modify(&self, _ctx: &Context, _response: &mut Response<Body>) -> Result<(), FilterError> {
            Ok(())
        }
    }

    filter_capabilities!(Tagged: request, stream);
    filter_capabilities!(RequestOnly: request);
    filter_capabilities!(ModifierOnly: modifier);

    #[test]
    fn classify_orders_chains() {
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(Tagged { tag: "A" }),
            Arc::new(RequestOnly),
            Arc::new(Tagged { tag: "C" }),
        ];
        let chains = FilterChains::classify(&filters);

        let request: Vec<_> = chains.request.iter().map(|f| f.name()).collect();
        let stream: Vec<_> = chains.stream.iter().map(|f| f.name()).collect();
        assert_eq!(request, vec!["A", "B", "C"]);
        assert_eq!(stream, vec!["C", "A"]);
        assert!(chains.modifier.is_empty());
    }

    #[test]
    fn default_name_is_type_name() {
        let filters: Vec<Arc<dyn Filter>> = vec![Arc::new(ModifierOnly)];
        let chains = FilterChains::classify(&filters);
        assert!(chains.request.is_empty());
        assert_eq!(chains.modifier.len(), 1);
        assert!(chains.modifier[0].name().ends_with("ModifierOnly"));
    }
}
