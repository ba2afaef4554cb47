//! gRPC transport backed by tonic.
//!
//! Each call runs in its own task on a shared, lazily connected channel and
//! reports back through the event feed.

mod codec;
mod config;
mod metadata;
mod path;

pub use codec::BytesCodec;
pub use config::{Compression, DEFAULT_HOST, KeepAlive, TransportConfig};
pub use metadata::{apply_to_tonic, from_tonic};
pub use path::GrpcPath;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use rpcmux_lite::event::{CallEvent, EventSender, decode_payload};
use rpcmux_lite::{CallId, Metadata, StatusCode, Transport};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tonic::codec::CompressionEncoding;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};

use crate::error::TransportSetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallShape {
    Unary,
    ServerStreaming,
}

/// A [`Transport`] that performs calls against a gRPC server.
///
/// The mobile client's idle, channel-init, connection-state and UI-log hooks
/// have no counterpart here; [`TonicTransport::reset_connection`] covers
/// reconnecting.
#[derive(Clone)]
pub struct TonicTransport {
    inner: Arc<Inner>,
}

struct Inner {
    events: EventSender,
    state: RwLock<State>,
    calls: DashMap<CallId, AbortHandle, ahash::RandomState>,
}

struct State {
    config: TransportConfig,
    channel: Channel,
}

impl TonicTransport {
    pub fn new(config: TransportConfig, events: EventSender) -> Result<Self, TransportSetupError> {
        let channel = connect(&config)?;
        tracing::info!(uri = %config.uri(), "Created gRPC transport");

        Ok(Self {
            inner: Arc::new(Inner {
                events,
                state: RwLock::new(State { config, channel }),
                calls: DashMap::default(),
            }),
        })
    }

    pub fn config(&self) -> TransportConfig {
        self.inner.state.read().config.clone()
    }

    /// Replace the settings. Calls already running keep their old channel.
    pub fn set_config(&self, config: TransportConfig) -> Result<(), TransportSetupError> {
        let channel = connect(&config)?;
        tracing::info!(uri = %config.uri(), "Updated gRPC transport settings");

        let mut state = self.inner.state.write();
        state.config = config;
        state.channel = channel;
        Ok(())
    }

    /// Drop the current connection and reconnect on the next call.
    pub fn reset_connection(&self, reason: &str) -> Result<(), TransportSetupError> {
        let mut state = self.inner.state.write();
        state.channel = connect(&state.config)?;
        tracing::info!(reason = %reason, uri = %state.config.uri(), "Reset gRPC connection");
        Ok(())
    }

    /// Number of call tasks still running.
    pub fn active_calls(&self) -> usize {
        self.inner.calls.len()
    }

    fn start(&self, id: CallId, shape: CallShape, method: &str, payload: String, metadata: &Metadata) {
        if self.inner.events.is_closed() {
            tracing::warn!(call_id = %id, method = %method, "Event feed closed, not starting call");
            return;
        }

        let (path, request) = match prepare(method, &payload, metadata) {
            Ok(prepared) => prepared,
            Err((message, code)) => {
                tracing::warn!(call_id = %id, method = %method, error = %message, "Rejected call");
                self.inner
                    .events
                    .send(CallEvent::error(id, message, code.to_code(), Metadata::new()));
                return;
            }
        };

        let (channel, config) = {
            let state = self.inner.state.read();
            (state.channel.clone(), state.config.clone())
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            run_call(&inner.events, id, shape, channel, &config, path, request).await;
            inner.calls.remove(&id);
        });

        let abort = handle.abort_handle();
        self.inner.calls.insert(id, abort);
        if handle.is_finished() {
            self.inner.calls.remove(&id);
        }
    }
}

impl Transport for TonicTransport {
    fn start_unary_call(&self, id: CallId, method: &str, payload: String, metadata: &Metadata) {
        self.start(id, CallShape::Unary, method, payload, metadata);
    }

    fn start_server_streaming_call(
        &self,
        id: CallId,
        method: &str,
        payload: String,
        metadata: &Metadata,
    ) {
        self.start(id, CallShape::ServerStreaming, method, payload, metadata);
    }

    fn cancel_call(&self, id: CallId) {
        if let Some((_, abort)) = self.inner.calls.remove(&id) {
            abort.abort();
            tracing::debug!(call_id = %id, "Aborted call task");
        }
    }
}

impl std::fmt::Debug for TonicTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TonicTransport")
            .field("config", &self.inner.state.read().config)
            .field("active_calls", &self.inner.calls.len())
            .finish()
    }
}

type PreparedRequest = (PathAndQuery, Request<Bytes>);

fn prepare(
    method: &str,
    payload: &str,
    metadata: &Metadata,
) -> Result<PreparedRequest, (String, StatusCode)> {
    let path = GrpcPath::parse(method).map_err(|e| (e.to_string(), StatusCode::InvalidArgument))?;
    let path = PathAndQuery::try_from(path.request_path())
        .map_err(|e| (e.to_string(), StatusCode::InvalidArgument))?;

    let body = decode_payload(payload)
        .map_err(|e| (format!("invalid request payload: {e}"), StatusCode::InvalidArgument))?;

    let mut request = Request::new(Bytes::from(body));
    apply_to_tonic(metadata, request.metadata_mut());
    Ok((path, request))
}

fn connect(config: &TransportConfig) -> Result<Channel, TransportSetupError> {
    let mut endpoint = Endpoint::from_shared(config.uri())?;
    if !config.insecure {
        endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
    }
    if let Some(keep_alive) = config.keep_alive {
        endpoint = endpoint
            .http2_keep_alive_interval(keep_alive.interval)
            .keep_alive_timeout(keep_alive.timeout)
            .keep_alive_while_idle(keep_alive.while_idle);
    }
    if let Some(timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }
    Ok(endpoint.connect_lazy())
}

async fn run_call(
    events: &EventSender,
    id: CallId,
    shape: CallShape,
    channel: Channel,
    config: &TransportConfig,
    path: PathAndQuery,
    request: Request<Bytes>,
) {
    match perform(events, id, shape, channel, config, path, request).await {
        Ok(()) => tracing::debug!(call_id = %id, "Call completed"),
        Err(status) => {
            tracing::warn!(
                call_id = %id,
                code = ?status.code(),
                error = %status.message(),
                "Call failed"
            );
            events.send(CallEvent::error(
                id,
                status.message(),
                i32::from(status.code()),
                from_tonic(status.metadata()),
            ));
        }
    }
}

// Both shapes go through `server_streaming` so headers and trailers arrive
// as separate events.
async fn perform(
    events: &EventSender,
    id: CallId,
    shape: CallShape,
    channel: Channel,
    config: &TransportConfig,
    path: PathAndQuery,
    request: Request<Bytes>,
) -> Result<(), Status> {
    let mut grpc = tonic::client::Grpc::new(channel);
    if let Some(limit) = config.response_size_limit {
        grpc = grpc.max_decoding_message_size(limit);
    }
    if let Some(Compression::Gzip) = config.compression {
        grpc = grpc
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
    }

    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;

    let response = grpc.server_streaming(request, path, BytesCodec).await?;
    events.send(CallEvent::headers(id, from_tonic(response.metadata())));

    let mut messages = response.into_inner();
    while let Some(message) = messages.message().await? {
        events.send(CallEvent::response(id, &message));
        if shape == CallShape::Unary {
            break;
        }
    }

    let trailers = messages.trailers().await?.unwrap_or_default();
    events.send(CallEvent::trailers(id, from_tonic(&trailers)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcmux_lite::EventKind;
    use rpcmux_lite::event;

    fn insecure() -> TransportConfig {
        TransportConfig::builder()
            .host("127.0.0.1:1")
            .insecure(true)
            .connect_timeout(std::time::Duration::from_secs(1))
            .build()
    }

    #[test]
    fn test_prepare_request() {
        let metadata = Metadata::from([("x-token".to_string(), "abc".to_string())]);
        let (path, request) = prepare("grpc.health.v1.Health/Check", "AQID", &metadata).unwrap();

        assert_eq!(path.as_str(), "/grpc.health.v1.Health/Check");
        assert_eq!(request.get_ref().as_ref(), &[1, 2, 3]);
        assert_eq!(request.metadata().get("x-token").unwrap(), "abc");
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        let (_, code) = prepare("NoSlash", "", &Metadata::new()).unwrap_err();
        assert_eq!(code, StatusCode::InvalidArgument);

        let (message, code) = prepare("pkg.Svc/M", "not base64!", &Metadata::new()).unwrap_err();
        assert_eq!(code, StatusCode::InvalidArgument);
        assert!(message.contains("payload"));
    }

    #[tokio::test]
    async fn test_invalid_method_reports_error_event() {
        let (events, mut feed) = event::channel();
        let transport = TonicTransport::new(insecure(), events).unwrap();

        transport.start_unary_call(CallId::new(7), "bad", String::new(), &Metadata::new());

        let event = feed.recv().await.unwrap();
        assert_eq!(event.id, CallId::new(7));
        match event.kind {
            EventKind::Error(info) => assert_eq!(info.code, StatusCode::InvalidArgument.to_code()),
            other => panic!("expected error event, got {}", other.name()),
        }
        assert_eq!(transport.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error() {
        let (events, mut feed) = event::channel();
        let transport = TonicTransport::new(insecure(), events).unwrap();

        transport.start_unary_call(
            CallId::new(1),
            "grpc.health.v1.Health/Check",
            String::new(),
            &Metadata::new(),
        );

        let event = feed.recv().await.unwrap();
        assert_eq!(event.id, CallId::new(1));
        assert!(matches!(event.kind, EventKind::Error(_)));
    }

    #[tokio::test]
    async fn test_set_config_and_reset() {
        let (events, _feed) = event::channel();
        let transport = TonicTransport::new(insecure(), events).unwrap();

        let updated = TransportConfig::builder()
            .host("127.0.0.1:2")
            .insecure(true)
            .compression(Compression::Gzip)
            .build();
        transport.set_config(updated.clone()).unwrap();
        assert_eq!(transport.config(), updated);

        transport.reset_connection("test").unwrap();
        assert_eq!(transport.config(), updated);
    }

    #[tokio::test]
    async fn test_closed_feed_skips_call() {
        let (events, feed) = event::channel();
        let transport = TonicTransport::new(insecure(), events).unwrap();

        transport.start_unary_call(
            CallId::new(1),
            "grpc.health.v1.Health/Check",
            String::new(),
            &Metadata::new(),
        );
        assert_eq!(transport.active_calls(), 1);
        transport.cancel_call(CallId::new(1));

        drop(feed);
        transport.start_unary_call(
            CallId::new(2),
            "grpc.health.v1.Health/Check",
            String::new(),
            &Metadata::new(),
        );
        assert_eq!(transport.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_call_is_noop() {
        let (events, _feed) = event::channel();
        let transport = TonicTransport::new(insecure(), events).unwrap();
        transport.cancel_call(CallId::new(99));
        assert_eq!(transport.active_calls(), 0);
    }
}
