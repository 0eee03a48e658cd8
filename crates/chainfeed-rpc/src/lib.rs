//! chainfeed-rpc — JSON-RPC transports for ChainFeed.
//!
//! - [`RpcTransport`] — request/response (pull) transport, implemented over
//!   HTTP by [`HttpRpcClient`]
//! - [`PushSink`] + [`Inbound`] — the push transport contract: outbound
//!   requests go through the sink, inbound frames and transport errors arrive
//!   on a channel. [`WsPushTransport`] implements it over a WebSocket.
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`TransportError`] — structured error type

pub mod error;
pub mod http;
pub mod push;
pub mod request;
pub mod transport;
pub mod ws;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use push::{Inbound, PushSink};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
pub use ws::{WsPushTransport, WsSink};
