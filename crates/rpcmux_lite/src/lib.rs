//! Multiplexes concurrent RPC calls over a single transport event feed.
//!
//! A transport starts calls and reports everything that happens to them as
//! [`CallEvent`]s tagged with the call's [`CallId`]. The [`EventRouter`]
//! matches those events against the [`CallRegistry`] and settles each call's
//! headers, response (or message stream) and trailers exactly once.

pub mod client;
pub mod deferred;
pub mod error;
pub mod event;
pub mod id;
pub mod metadata;
pub mod registry;
pub mod router;
pub mod stream;
pub mod transport;

pub use client::{CallCanceller, RpcClient, RpcClientConfig, StreamingCall, UnaryCall};
pub use deferred::Deferred;
pub use error::{CallError, RpcClientError, StatusCode, TransportError};
pub use event::{CallEvent, ErrorInfo, EventKind, EventReceiver, EventSender};
pub use id::{CallId, IdGenerator};
pub use metadata::Metadata;
pub use registry::{CallEntry, CallOutput, CallRegistry};
pub use router::{EventRouter, Routed, route};
pub use stream::{MessageStream, ServerOutputStream};
pub use transport::Transport;
