use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{StatusCode, TransportError};
use crate::event::{CallEvent, ErrorInfo, EventKind, decode_payload};
use crate::id::CallId;
use crate::metadata::Metadata;
use crate::registry::{CallOutput, CallRegistry};

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to a call that is still outstanding.
    Delivered,
    /// Delivered a terminal event; the call was removed from the registry.
    Finished,
    /// No call registered for the id. The event was discarded.
    Dropped,
    /// The response payload could not be decoded; the call was failed and removed.
    Malformed,
}

/// Apply one transport event to the registry.
///
/// Never fails: an event for an unknown id is a normal race with cancellation
/// or completion and is simply dropped.
pub fn route(registry: &CallRegistry, event: CallEvent) -> Routed {
    let CallEvent { id, kind } = event;

    match kind {
        EventKind::Headers(metadata) => {
            let Some(entry) = registry.lookup(id) else {
                return dropped(id, "headers");
            };
            if let Some(headers) = &entry.headers {
                headers.resolve(metadata);
            }
            Routed::Delivered
        }

        EventKind::Response(payload) => {
            let Some(entry) = registry.lookup(id) else {
                return dropped(id, "response");
            };
            let data = match decode_payload(&payload) {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    warn!(call_id = %id, error = %e, "Failed to decode response payload");
                    if let Some(entry) = registry.remove(id) {
                        let error = TransportError {
                            message: format!("malformed response payload: {e}"),
                            code: StatusCode::Internal,
                            trailers: Metadata::new(),
                        };
                        entry.fail(error.into());
                    }
                    return Routed::Malformed;
                }
            };
            match &entry.output {
                CallOutput::Streaming(stream) => stream.notify_data(data),
                CallOutput::Unary(response) => {
                    response.resolve(data);
                }
            }
            Routed::Delivered
        }

        EventKind::Trailers(metadata) => {
            let Some(entry) = registry.remove(id) else {
                return dropped(id, "trailers");
            };
            match &entry.output {
                CallOutput::Streaming(stream) => stream.notify_complete(),
                // no-op when the response already arrived
                CallOutput::Unary(response) => {
                    response.reject(
                        TransportError {
                            message: "call completed without a response".to_string(),
                            code: StatusCode::Internal,
                            trailers: metadata.clone(),
                        }
                        .into(),
                    );
                }
            }
            if let Some(trailers) = &entry.trailers {
                trailers.resolve(metadata);
            }
            debug!(call_id = %id, "Call finished");
            Routed::Finished
        }

        EventKind::Error(ErrorInfo {
            message,
            code,
            trailers,
        }) => {
            let Some(entry) = registry.remove(id) else {
                return dropped(id, "error");
            };
            let error = TransportError::new(message, code, trailers);
            debug!(call_id = %id, error = %error, "Call failed");
            entry.fail(error.into());
            Routed::Finished
        }
    }
}

fn dropped(id: CallId, kind: &'static str) -> Routed {
    debug!(call_id = %id, kind, "Dropping event for unknown call");
    Routed::Dropped
}

/// Drains a transport's event feed into a client's registry.
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: Arc<CallRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<CallRegistry>) -> Self {
        Self { registry }
    }

    /// Route a single event.
    pub fn dispatch(&self, event: CallEvent) -> Routed {
        route(&self.registry, event)
    }

    /// Route events until the feed ends.
    pub async fn run<S>(self, feed: S)
    where
        S: Stream<Item = CallEvent> + Send,
    {
        let mut feed = std::pin::pin!(feed);

        info!("Event router started");

        while let Some(event) = feed.next().await {
            self.dispatch(event);
        }

        info!(
            outstanding = self.registry.len(),
            "Event feed closed, router shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Deferred;
    use crate::error::CallError;
    use crate::registry::CallEntry;
    use crate::stream::ServerOutputStream;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    struct Unary {
        headers: Deferred<Metadata>,
        response: Deferred<Bytes>,
        trailers: Deferred<Metadata>,
    }

    fn register_unary(registry: &CallRegistry, id: u64) -> Unary {
        let token = CancellationToken::new();
        let call = Unary {
            headers: Deferred::new(token.clone()),
            response: Deferred::new(token.clone()),
            trailers: Deferred::new(token),
        };
        registry
            .register(
                CallId::new(id),
                CallEntry {
                    headers: Some(call.headers.clone()),
                    output: CallOutput::Unary(call.response.clone()),
                    trailers: Some(call.trailers.clone()),
                },
            )
            .unwrap();
        call
    }

    fn register_streaming(registry: &CallRegistry, id: u64) -> ServerOutputStream {
        let token = CancellationToken::new();
        let stream = ServerOutputStream::new(token.clone());
        registry
            .register(
                CallId::new(id),
                CallEntry {
                    headers: Some(Deferred::new(token.clone())),
                    output: CallOutput::Streaming(stream.clone()),
                    trailers: Some(Deferred::new(token)),
                },
            )
            .unwrap();
        stream
    }

    fn meta(key: &str, value: &str) -> Metadata {
        Metadata::from([(key.to_string(), value.to_string())])
    }

    #[test]
    fn test_unary_lifecycle() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);
        let id = CallId::new(1);

        assert_eq!(
            route(&registry, CallEvent::headers(id, meta("a", "1"))),
            Routed::Delivered
        );
        assert_eq!(
            route(&registry, CallEvent::response(id, &[1, 2, 3])),
            Routed::Delivered
        );
        assert_eq!(
            route(&registry, CallEvent::trailers(id, meta("b", "2"))),
            Routed::Finished
        );

        assert_eq!(call.headers.try_get(), Some(Ok(meta("a", "1"))));
        assert_eq!(
            call.response.try_get(),
            Some(Ok(Bytes::from_static(&[1, 2, 3])))
        );
        assert_eq!(call.trailers.try_get(), Some(Ok(meta("b", "2"))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_response_after_token_fired_is_cancelled() {
        // the client's token fires before its registry is drained
        let registry = CallRegistry::new();
        let token = CancellationToken::new();
        let response = Deferred::new(token.clone());
        registry
            .register(
                CallId::new(1),
                CallEntry {
                    headers: None,
                    output: CallOutput::Unary(response.clone()),
                    trailers: None,
                },
            )
            .unwrap();

        token.cancel();
        route(&registry, CallEvent::response(CallId::new(1), b"late"));
        assert_eq!(response.try_get(), Some(Err(CallError::Cancelled)));
    }

    #[test]
    fn test_error_rejects_all_handles() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);

        let outcome = route(
            &registry,
            CallEvent::error(CallId::new(1), "unavailable", 14, meta("t", "v")),
        );
        assert_eq!(outcome, Routed::Finished);

        for result in [
            call.headers.try_get().map(|r| r.map(|_| ())),
            call.response.try_get().map(|r| r.map(|_| ())),
            call.trailers.try_get().map(|r| r.map(|_| ())),
        ] {
            let Some(Err(CallError::Transport(err))) = result else {
                panic!("expected transport error");
            };
            assert_eq!(err.code, StatusCode::Unavailable);
            assert_eq!(err.message, "unavailable");
            assert_eq!(err.trailers, meta("t", "v"));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_id_dropped() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);
        let other = CallId::new(2);

        assert_eq!(
            route(&registry, CallEvent::headers(other, Metadata::new())),
            Routed::Dropped
        );
        assert_eq!(
            route(&registry, CallEvent::response(other, b"x")),
            Routed::Dropped
        );
        assert_eq!(
            route(&registry, CallEvent::trailers(other, Metadata::new())),
            Routed::Dropped
        );
        assert_eq!(
            route(&registry, CallEvent::error(other, "x", 2, Metadata::new())),
            Routed::Dropped
        );

        assert!(!call.headers.is_settled());
        assert!(!call.response.is_settled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_events_after_terminal_dropped() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);
        let id = CallId::new(1);

        route(&registry, CallEvent::error(id, "x", 13, Metadata::new()));
        assert_eq!(
            route(&registry, CallEvent::trailers(id, Metadata::new())),
            Routed::Dropped
        );
        assert!(matches!(
            call.trailers.try_get(),
            Some(Err(CallError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn test_streaming_messages_then_complete() {
        let registry = CallRegistry::new();
        let stream = register_streaming(&registry, 7);
        let id = CallId::new(7);

        for n in 1..=3u8 {
            assert_eq!(
                route(&registry, CallEvent::response(id, &[n])),
                Routed::Delivered
            );
        }
        route(&registry, CallEvent::trailers(id, Metadata::new()));

        let items: Vec<_> = stream.subscribe().unwrap().collect().await;
        assert_eq!(
            items,
            vec![
                Ok(Bytes::from_static(&[1])),
                Ok(Bytes::from_static(&[2])),
                Ok(Bytes::from_static(&[3])),
            ]
        );
    }

    #[test]
    fn test_malformed_payload_fails_call() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);

        let outcome = route(
            &registry,
            CallEvent {
                id: CallId::new(1),
                kind: EventKind::Response("%%%".to_string()),
            },
        );
        assert_eq!(outcome, Routed::Malformed);
        assert_eq!(
            call.response.try_get().and_then(|r| r.err()).and_then(|e| e.code()),
            Some(StatusCode::Internal)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unary_trailers_without_response() {
        let registry = CallRegistry::new();
        let call = register_unary(&registry, 1);

        route(&registry, CallEvent::trailers(CallId::new(1), meta("k", "v")));

        assert_eq!(call.trailers.try_get(), Some(Ok(meta("k", "v"))));
        assert_eq!(
            call.response.try_get().and_then(|r| r.err()).and_then(|e| e.code()),
            Some(StatusCode::Internal)
        );
    }

    #[tokio::test]
    async fn test_run_drains_feed() {
        let registry = Arc::new(CallRegistry::new());
        let call = register_unary(&registry, 1);
        let id = CallId::new(1);

        let (tx, rx) = crate::event::channel();
        let router = tokio::spawn(EventRouter::new(Arc::clone(&registry)).run(rx));

        tx.send(CallEvent::response(id, b"ok"));
        tx.send(CallEvent::trailers(id, Metadata::new()));
        drop(tx);
        router.await.unwrap();

        assert_eq!(call.response.wait().await, Ok(Bytes::from_static(b"ok")));
        assert!(registry.is_empty());
    }
}
