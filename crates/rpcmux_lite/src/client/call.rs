use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::IntoFuture;

use crate::client::cancel::CallCanceller;
use crate::deferred::Deferred;
use crate::error::CallError;
use crate::id::CallId;
use crate::metadata::Metadata;
use crate::stream::{MessageStream, ServerOutputStream};

/// Fire `canceller` once `outcome` is rejected, so the transport is told to
/// stop even when nobody awaits the call.
pub(crate) fn cancel_on_failure<T>(outcome: Deferred<T>, canceller: CallCanceller)
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        if outcome.wait().await.is_err() {
            canceller.cancel();
        }
    });
}

async fn settle_or_cancel<T: Clone>(
    outcome: &Deferred<T>,
    canceller: &CallCanceller,
) -> Result<T, CallError> {
    let result = outcome.wait().await;
    if result.is_err() {
        canceller.cancel();
    }
    result
}

/// A unary call in flight.
///
/// Awaiting the call yields the response message. Headers and trailers can be
/// awaited separately, before or after the response. Dropping the call before
/// its response settles cancels it.
#[derive(Debug)]
pub struct UnaryCall {
    id: CallId,
    method: String,
    headers: Deferred<Metadata>,
    response: Deferred<Bytes>,
    trailers: Deferred<Metadata>,
    canceller: CallCanceller,
}

impl UnaryCall {
    pub(crate) fn new(
        id: CallId,
        method: String,
        headers: Deferred<Metadata>,
        response: Deferred<Bytes>,
        trailers: Deferred<Metadata>,
        canceller: CallCanceller,
    ) -> Self {
        Self {
            id,
            method,
            headers,
            response,
            trailers,
            canceller,
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn headers(&self) -> Result<Metadata, CallError> {
        self.headers.wait().await
    }

    /// The response message. A failed response cancels the call.
    pub async fn response(&self) -> Result<Bytes, CallError> {
        settle_or_cancel(&self.response, &self.canceller).await
    }

    pub async fn trailers(&self) -> Result<Metadata, CallError> {
        self.trailers.wait().await
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// A cancel handle that can outlive the call object.
    pub fn canceller(&self) -> CallCanceller {
        self.canceller.clone()
    }
}

impl Drop for UnaryCall {
    fn drop(&mut self) {
        if !self.response.is_settled() {
            tracing::debug!(call_id = %self.id, "Unary call dropped while pending");
            self.canceller.cancel();
        }
    }
}

impl IntoFuture for UnaryCall {
    type Output = Result<Bytes, CallError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.response().await })
    }
}

/// A server-streaming call in flight.
///
/// Messages are consumed through [`StreamingCall::messages`], concurrently
/// with awaiting the call itself, which yields the trailers. Dropping the call
/// while it is still running cancels it, unless the message stream was taken;
/// the stream then keeps the call alive until it ends or
/// [`CallCanceller::cancel`] is used.
#[derive(Debug)]
pub struct StreamingCall {
    id: CallId,
    method: String,
    headers: Deferred<Metadata>,
    stream: ServerOutputStream,
    trailers: Deferred<Metadata>,
    canceller: CallCanceller,
}

impl StreamingCall {
    pub(crate) fn new(
        id: CallId,
        method: String,
        headers: Deferred<Metadata>,
        stream: ServerOutputStream,
        trailers: Deferred<Metadata>,
        canceller: CallCanceller,
    ) -> Self {
        Self {
            id,
            method,
            headers,
            stream,
            trailers,
            canceller,
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn headers(&self) -> Result<Metadata, CallError> {
        self.headers.wait().await
    }

    /// The response messages. Only the first call returns the stream.
    ///
    /// Messages that arrived before this call are buffered and delivered first.
    pub fn messages(&self) -> Option<MessageStream> {
        self.stream.subscribe()
    }

    /// The final metadata. A failed call cancels itself.
    pub async fn trailers(&self) -> Result<Metadata, CallError> {
        settle_or_cancel(&self.trailers, &self.canceller).await
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    pub fn canceller(&self) -> CallCanceller {
        self.canceller.clone()
    }
}

impl Drop for StreamingCall {
    fn drop(&mut self) {
        if !self.trailers.is_settled() && !self.stream.is_subscribed() {
            tracing::debug!(call_id = %self.id, "Streaming call dropped while pending");
            self.canceller.cancel();
        }
    }
}

impl IntoFuture for StreamingCall {
    type Output = Result<Metadata, CallError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.trailers().await })
    }
}
