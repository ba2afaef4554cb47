use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;

type Item = Result<Bytes, CallError>;

/// The producer side of a server-streaming response.
///
/// Messages pushed before a consumer subscribes are buffered, and a terminal
/// state reached before subscription is replayed after the buffered messages.
/// Once terminal, further notifications are ignored.
#[derive(Clone)]
pub struct ServerOutputStream {
    shared: Arc<Shared>,
}

struct Shared {
    // `None` once the stream is terminal.
    sender: Mutex<Option<mpsc::UnboundedSender<Item>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
    token: CancellationToken,
}

impl ServerOutputStream {
    pub fn new(token: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                token,
            }),
        }
    }

    pub fn notify_data(&self, data: Bytes) {
        if let Some(tx) = self.shared.sender.lock().as_ref() {
            // The consumer may have been dropped; nothing left to deliver to.
            let _ = tx.send(Ok(data));
        }
    }

    pub fn notify_complete(&self) {
        // Dropping the sender ends the consumer after the buffered messages.
        self.shared.sender.lock().take();
    }

    pub fn notify_error(&self, error: CallError) {
        if let Some(tx) = self.shared.sender.lock().take() {
            let _ = tx.send(Err(error));
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.sender.lock().is_none()
    }

    /// Whether the consumer has been handed out.
    pub fn is_subscribed(&self) -> bool {
        self.shared.receiver.lock().is_none()
    }

    /// Attach the consumer. Only the first subscription gets the stream.
    pub fn subscribe(&self) -> Option<MessageStream> {
        let rx = self.shared.receiver.lock().take()?;
        Some(MessageStream::new(rx, self.shared.token.clone()))
    }
}

impl fmt::Debug for ServerOutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOutputStream")
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

/// The consumer side of a server-streaming response.
///
/// Yields each message in order, then ends cleanly on completion or yields a
/// single error and ends. If the call's cancellation token fires before the
/// stream is terminal, the stream yields [`CallError::Cancelled`].
pub struct MessageStream {
    inner: Pin<Box<dyn Stream<Item = Item> + Send>>,
}

impl MessageStream {
    fn new(mut rx: mpsc::UnboundedReceiver<Item>, token: CancellationToken) -> Self {
        let inner = stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    item = rx.recv() => item,
                    _ = token.cancelled() => Some(Err(CallError::Cancelled)),
                };

                match next {
                    Some(Ok(data)) => yield Ok(data),
                    Some(Err(e)) => {
                        yield Err(e);
                        break;
                    }
                    None => break,
                }
            }
        };

        Self {
            inner: Box::pin(inner),
        }
    }
}

impl Stream for MessageStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}
