use std::sync::Arc;

use crate::id::CallId;
use crate::metadata::Metadata;

/// The native side that actually performs calls.
///
/// Starting a call is fire-and-forget: everything the transport learns about
/// the call afterwards is reported as [`CallEvent`](crate::event::CallEvent)s
/// tagged with `id` on the event feed. Payloads arrive base64 encoded.
pub trait Transport: Send + Sync + 'static {
    fn start_unary_call(&self, id: CallId, method: &str, payload: String, metadata: &Metadata);

    fn start_server_streaming_call(
        &self,
        id: CallId,
        method: &str,
        payload: String,
        metadata: &Metadata,
    );

    /// Best-effort request to stop a call. Transports that cannot cancel keep
    /// the default no-op. Must tolerate ids that already finished.
    fn cancel_call(&self, _id: CallId) {}
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn start_unary_call(&self, id: CallId, method: &str, payload: String, metadata: &Metadata) {
        (**self).start_unary_call(id, method, payload, metadata)
    }

    fn start_server_streaming_call(
        &self,
        id: CallId,
        method: &str,
        payload: String,
        metadata: &Metadata,
    ) {
        (**self).start_server_streaming_call(id, method, payload, metadata)
    }

    fn cancel_call(&self, id: CallId) {
        (**self).cancel_call(id)
    }
}
