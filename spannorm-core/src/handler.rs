//! The host-facing event handler: [`Callbacks`] over a [`SpanManager`].
//!
//! Every entry point swallows failures. A panic inside span bookkeeping is
//! logged and the host operation carries on untraced.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::CoreResult;
use crate::event::Event;
use crate::hooks::{Callbacks, OperationEnd, OperationError, OperationStart};
use crate::lifecycle::SpanManager;
use crate::sweep::Sweeper;
use crate::telemetry::{ContextProvider, TracingBackend};

pub struct SpanHandler {
    manager: Arc<SpanManager>,
    sweeper: Option<Sweeper>,
}

impl std::fmt::Debug for SpanHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandler")
            .field("manager", &self.manager)
            .field("sweeping", &self.sweeper.is_some())
            .finish()
    }
}

impl SpanHandler {
    /// Handler with a background sweep thread. The thread stops when the
    /// handler is dropped.
    pub fn new(
        backend: Arc<dyn TracingBackend>,
        context: Arc<dyn ContextProvider>,
        clock: Arc<dyn Clock>,
        cfg: &Config,
    ) -> CoreResult<Self> {
        let manager = Arc::new(SpanManager::new(backend, context, clock.clone(), cfg)?);
        let sweeper = Sweeper::spawn(manager.queue(), clock, &cfg.sweep)?;
        Ok(Self {
            manager,
            sweeper: Some(sweeper),
        })
    }

    /// Handler whose sweep runs only through [`SpanManager::sweep_now`].
    pub fn without_sweeper(
        backend: Arc<dyn TracingBackend>,
        context: Arc<dyn ContextProvider>,
        clock: Arc<dyn Clock>,
        cfg: &Config,
    ) -> CoreResult<Self> {
        Ok(Self {
            manager: Arc::new(SpanManager::new(backend, context, clock, cfg)?),
            sweeper: None,
        })
    }

    pub fn manager(&self) -> &Arc<SpanManager> {
        &self.manager
    }
}

fn contained(entry: &'static str, span_id: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(entry, span_id = %span_id, "span handler panicked");
    }
}

impl Callbacks for SpanHandler {
    fn on_start(&self, op: &OperationStart) {
        contained("on_start", &op.id, || {
            self.manager
                .start(&op.id, op.parent_id.as_deref(), op.instance.as_ref(), &op.bound_args);
        });
    }

    fn on_progress(&self, event: &Event) {
        contained("on_progress", event.span_id.as_deref().unwrap_or_default(), || {
            self.manager.process_event(event);
        });
    }

    fn on_end(&self, op: &OperationEnd) {
        contained("on_end", &op.id, || {
            self.manager.finish(&op.id, op.instance.as_ref(), &op.result);
        });
    }

    fn on_error(&self, op: &OperationError) {
        contained("on_error", &op.id, || {
            self.manager.drop_span(&op.id, &op.error);
        });
    }
}
