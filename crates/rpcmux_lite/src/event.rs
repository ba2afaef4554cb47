//! The typed event feed between a transport and the router.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::id::CallId;
use crate::metadata::Metadata;

/// Error details carried by an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub code: i32,
    pub trailers: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Initial response metadata.
    Headers(Metadata),
    /// One response message, base64 encoded.
    Response(String),
    /// Final response metadata. Terminal.
    Trailers(Metadata),
    /// The call failed. Terminal.
    Error(ErrorInfo),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Headers(_) => "headers",
            EventKind::Response(_) => "response",
            EventKind::Trailers(_) => "trailers",
            EventKind::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Trailers(_) | EventKind::Error(_))
    }
}

/// An event emitted by the transport for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub id: CallId,
    pub kind: EventKind,
}

impl CallEvent {
    pub fn headers(id: CallId, metadata: Metadata) -> Self {
        Self {
            id,
            kind: EventKind::Headers(metadata),
        }
    }

    /// A response event carrying `payload`, encoded for transit.
    pub fn response(id: CallId, payload: &[u8]) -> Self {
        Self {
            id,
            kind: EventKind::Response(encode_payload(payload)),
        }
    }

    pub fn trailers(id: CallId, metadata: Metadata) -> Self {
        Self {
            id,
            kind: EventKind::Trailers(metadata),
        }
    }

    pub fn error(id: CallId, message: impl Into<String>, code: i32, trailers: Metadata) -> Self {
        Self {
            id,
            kind: EventKind::Error(ErrorInfo {
                message: message.into(),
                code,
                trailers,
            }),
        }
    }
}

/// Encode a binary payload for transit across the transport boundary.
pub fn encode_payload(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decode a payload received from the transport.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload)
}

/// Create an unbounded event feed.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// The transport's end of the event feed.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventSender {
    /// Returns `false` if the router is gone.
    pub fn send(&self, event: CallEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The router's end of the event feed.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<CallEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<CallEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventReceiver {
    type Item = CallEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_encoding() {
        assert_eq!(encode_payload(&[1, 2, 3]), "AQID");
        assert_eq!(decode_payload("AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_payload("not base64!").is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        let id = CallId::new(1);
        assert!(!CallEvent::headers(id, Metadata::new()).kind.is_terminal());
        assert!(!CallEvent::response(id, b"x").kind.is_terminal());
        assert!(CallEvent::trailers(id, Metadata::new()).kind.is_terminal());
        assert!(CallEvent::error(id, "x", 2, Metadata::new()).kind.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, mut rx) = channel();
        let id = CallId::new(4);
        assert!(tx.send(CallEvent::headers(id, Metadata::new())));
        assert!(tx.send(CallEvent::response(id, b"a")));
        assert!(tx.send(CallEvent::trailers(id, Metadata::new())));
        drop(tx);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.rx.try_recv().ok())
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(kinds, vec!["headers", "response", "trailers"]);
        assert!(rx.recv().await.is_none());
    }
}
