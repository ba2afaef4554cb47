//! gRPC transport for the `rpcmux_lite` call multiplexer.
//!
//! [`TonicTransport`](transport::TonicTransport) implements
//! [`rpcmux_lite::Transport`] on top of a tonic channel, feeding headers,
//! messages, trailers and errors back into an [`rpcmux_lite::RpcClient`].

pub mod error;
pub mod transport;

pub use error::TransportSetupError;
pub use transport::{Compression, GrpcPath, KeepAlive, TonicTransport, TransportConfig};
