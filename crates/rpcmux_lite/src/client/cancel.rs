use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::error::CallError;
use crate::id::CallId;
use crate::registry::CallRegistry;
use crate::transport::Transport;

/// Cancels one call. Clones share the same one-shot state.
///
/// The first `cancel` fires the call's token, removes the call from the
/// registry (rejecting whatever was still pending with
/// [`CallError::Cancelled`]) and asks the transport to stop the call. Every
/// later `cancel` does nothing. Handles that already settled keep their value.
#[derive(Clone)]
pub struct CallCanceller {
    inner: Arc<Inner>,
}

struct Inner {
    id: CallId,
    fired: AtomicBool,
    token: CancellationToken,
    registry: Arc<CallRegistry>,
    transport: Arc<dyn Transport>,
}

impl CallCanceller {
    pub(crate) fn new(
        id: CallId,
        token: CancellationToken,
        registry: Arc<CallRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                fired: AtomicBool::new(false),
                token,
                registry,
                transport,
            }),
        }
    }

    pub fn cancel(&self) {
        let inner = &self.inner;
        if inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        inner.token.cancel();

        if let Some(entry) = inner.registry.remove(inner.id) {
            tracing::debug!(call_id = %inner.id, "Cancelled outstanding call");
            entry.fail(CallError::Cancelled);
        }

        inner.transport.cancel_call(inner.id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

impl fmt::Debug for CallCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCanceller")
            .field("id", &self.inner.id)
            .field("fired", &self.inner.fired.load(Ordering::Acquire))
            .finish()
    }
}
