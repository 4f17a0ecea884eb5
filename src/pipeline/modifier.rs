//! Response modifier pipeline.
//!
//! Runs once per response, after the round trip and before the body reaches
//! the client: the proxy's own hook first, then every modifier filter in
//! chain order. The first failure stops the run. Modifiers touch status and
//! headers only; the body belongs to the streaming pipeline.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;

use crate::filter::{PipelineError, ResponseModifierFilter};
use crate::lifecycle::Context;
use crate::observability::metrics;
use crate::transport::BoxError;

/// Hook run on every upstream response before it is returned.
pub type ModifyResponse = Arc<dyn Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync>;

#[derive(Clone)]
pub struct ModifierChain {
    ctx: Context,
    hook: Option<ModifyResponse>,
    filters: Arc<[Arc<dyn ResponseModifierFilter>]>,
}

impl ModifierChain {
    pub fn new(
        ctx: Context,
        hook: Option<ModifyResponse>,
        filters: Vec<Arc<dyn ResponseModifierFilter>>,
    ) -> Self {
        Self {
            ctx,
            hook,
            filters: filters.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hook.is_none() && self.filters.is_empty()
    }

    pub fn apply(&self, response: &mut Response<Body>) -> Result<(), PipelineError> {
        let _entered = self.ctx.span().enter();

        if let Some(hook) = &self.hook {
            if let Err(e) = hook(response) {
                tracing::error!(error = %e, "Modify hook failed");
                metrics::record_modifier_error();
                return Err(PipelineError::Modifier(e));
            }
        }

        for filter in self.filters.iter() {
            if let Err(e) = filter.modify(&self.ctx, response) {
                tracing::error!(filter = filter.name(), error = %e, "Response modifier failed");
                metrics::record_modifier_error();
                return Err(PipelineError::Modifier(Box::new(e)));
            }
        }
        Ok(())
    }

    /// Collapse the chain into a single hook, ready to install on a proxy.
    pub fn into_hook(self) -> ModifyResponse {
        Arc::new(move |response: &mut Response<Body>| {
            self.apply(response).map_err(BoxError::from)
        })
    }
}
