//! Delivery of change events to listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::cache::Server;
use crate::event::{ChangeEvent, ChangeRecord, EventContext};
use crate::field::descriptor;
use crate::listener::ListenerRegistry;

/// Outcome of one dispatch, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Builds typed events from change records and invokes listeners.
///
/// Server-scoped listeners run before global listeners. Each listener is
/// called once, synchronously, in registration order; a failing listener
/// is logged and does not stop the rest.
pub struct Dispatcher {
    global: Arc<ListenerRegistry>,
}

impl Dispatcher {
    pub fn new(global: Arc<ListenerRegistry>) -> Self {
        Self { global }
    }

    /// The global listener registry.
    pub fn global(&self) -> &Arc<ListenerRegistry> {
        &self.global
    }

    /// Deliver one change to every interested listener.
    pub fn dispatch(
        &self,
        context: &EventContext,
        server: &Arc<Server>,
        record: ChangeRecord,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if record.is_noop() {
            return summary;
        }
        let Some(build) = descriptor(record.field).event else {
            return summary;
        };

        let event = ChangeEvent {
            context: context.clone(),
            server: Arc::clone(server),
            change: build(&record.old, &record.new),
        };

        let mut listeners = server.listeners().snapshot(record.field);
        listeners.extend(self.global.snapshot(record.field));

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => summary.delivered += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(server_id = %server.id(), field = ?record.field, error = %e, "listener failed");
                }
                Err(_) => {
                    summary.failed += 1;
                    warn!(server_id = %server.id(), field = ?record.field, "listener panicked");
                }
            }
        }

        trace!(
            server_id = %server.id(),
            field = ?record.field,
            delivered = summary.delivered,
            failed = summary.failed,
            "dispatched change"
        );
        summary
    }
}
