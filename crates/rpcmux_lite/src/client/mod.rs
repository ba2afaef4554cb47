//! Client-side call invocation.
//!
//! An `RpcClient` owns the call registry and hands out awaitable call
//! handles. Events coming back from the transport are fed through the
//! client's [`EventRouter`].
//!
//! # Example
//!
//! ```ignore
//! use rpcmux_lite::client::{RpcClient, RpcClientConfig};
//! use rpcmux_lite::event;
//!
//! let (events, feed) = event::channel();
//! let client = RpcClient::new(MyTransport::new(events), RpcClientConfig::new());
//! client.spawn_router(feed);
//!
//! let response = client
//!     .invoke_unary("echo.EchoService/Echo", payload, None)?
//!     .await?;
//! ```

mod call;
mod cancel;
mod config;

pub use call::{StreamingCall, UnaryCall};
pub use cancel::CallCanceller;
pub use config::RpcClientConfig;

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::deferred::Deferred;
use crate::error::{CallError, RpcClientError};
use crate::event::{CallEvent, encode_payload};
use crate::id::{CallId, IdGenerator};
use crate::metadata::{Metadata, merge_metadata};
use crate::registry::{CallEntry, CallOutput, CallRegistry};
use crate::router::EventRouter;
use crate::stream::ServerOutputStream;
use crate::transport::Transport;

/// Multiplexes calls over a single transport and event feed.
///
/// Each client has its own identity space and registry, so several clients
/// can share a process. Calls must be started from within a tokio runtime.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    registry: Arc<CallRegistry>,
    ids: IdGenerator,
    shutdown: CancellationToken,
    config: RpcClientConfig,
}

impl RpcClient {
    pub fn new(transport: impl Transport, config: RpcClientConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: RpcClientConfig) -> Self {
        Self {
            transport,
            registry: Arc::new(CallRegistry::with_limit(config.max_outstanding_calls)),
            ids: IdGenerator::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// The router that delivers this client's events.
    pub fn router(&self) -> EventRouter {
        EventRouter::new(Arc::clone(&self.registry))
    }

    /// Spawn the router on the current runtime, draining `feed` until it ends.
    pub fn spawn_router<S>(&self, feed: S) -> JoinHandle<()>
    where
        S: Stream<Item = CallEvent> + Send + 'static,
    {
        tokio::spawn(self.router().run(feed))
    }

    /// Start a unary call.
    pub fn invoke_unary(
        &self,
        method: impl Into<String>,
        payload: Bytes,
        metadata: Option<Metadata>,
    ) -> Result<UnaryCall, RpcClientError> {
        let method = method.into();
        let (id, token) = self.allocate()?;

        let headers = Deferred::new(token.clone());
        let response = Deferred::new(token.clone());
        let trailers = Deferred::new(token.clone());

        self.registry.register(
            id,
            CallEntry {
                headers: Some(headers.clone()),
                output: CallOutput::Unary(response.clone()),
                trailers: Some(trailers.clone()),
            },
        )?;

        let metadata = merge_metadata(&self.config.default_metadata, metadata);
        info!(call_id = %id, method = %method, "Starting unary call");
        self.transport
            .start_unary_call(id, &method, encode_payload(&payload), &metadata);

        let canceller = self.canceller(id, token);
        call::cancel_on_failure(response.clone(), canceller.clone());

        Ok(UnaryCall::new(
            id, method, headers, response, trailers, canceller,
        ))
    }

    /// Start a server-streaming call.
    pub fn invoke_server_streaming(
        &self,
        method: impl Into<String>,
        payload: Bytes,
        metadata: Option<Metadata>,
    ) -> Result<StreamingCall, RpcClientError> {
        let method = method.into();
        let (id, token) = self.allocate()?;

        let headers = Deferred::new(token.clone());
        let stream = ServerOutputStream::new(token.clone());
        let trailers = Deferred::new(token.clone());

        self.registry.register(
            id,
            CallEntry {
                headers: Some(headers.clone()),
                output: CallOutput::Streaming(stream.clone()),
                trailers: Some(trailers.clone()),
            },
        )?;

        let metadata = merge_metadata(&self.config.default_metadata, metadata);
        info!(call_id = %id, method = %method, "Starting server-streaming call");
        self.transport
            .start_server_streaming_call(id, &method, encode_payload(&payload), &metadata);

        let canceller = self.canceller(id, token);
        call::cancel_on_failure(trailers.clone(), canceller.clone());

        Ok(StreamingCall::new(
            id, method, headers, stream, trailers, canceller,
        ))
    }

    /// Number of calls still waiting for a terminal event.
    pub fn outstanding_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every outstanding call and refuse new ones.
    ///
    /// Every call token is a child of the client's token, so each call's
    /// canceller still tells the transport to stop that call.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let drained = self.registry.drain();
        info!(cancelled = drained.len(), "Shutting down RPC client");

        for (_, entry) in drained {
            entry.fail(CallError::Cancelled);
        }
    }

    fn allocate(&self) -> Result<(CallId, CancellationToken), RpcClientError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcClientError::Shutdown);
        }
        let id = self.ids.next();
        debug!(call_id = %id, "Allocated call id");
        Ok((id, self.shutdown.child_token()))
    }

    fn canceller(&self, id: CallId, token: CancellationToken) -> CallCanceller {
        CallCanceller::new(
            id,
            token,
            Arc::clone(&self.registry),
            Arc::clone(&self.transport),
        )
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("outstanding_calls", &self.registry.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .field("config", &self.config)
            .finish()
    }
}
