//! Push transport contract.
//!
//! A push transport is split in two halves: a [`PushSink`] that accepts
//! outbound requests, and an unbounded channel of [`Inbound`] events carrying
//! every frame the peer sends plus any connection-level failure. The channel
//! closing means the transport is gone.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::JsonRpcRequest;

/// An event delivered by a push transport.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded JSON frame, untyped.
    Frame(Value),
    /// A connection-level error (socket failure, peer reset).
    Error(TransportError),
}

/// Outbound half of a push transport.
#[async_trait]
pub trait PushSink: Send + Sync + 'static {
    /// Queue `req` for delivery. Returns once the request has been handed to
    /// the transport; responses arrive as [`Inbound::Frame`]s.
    async fn send(&self, req: JsonRpcRequest) -> Result<(), TransportError>;
}
