//! WebSocket push transport.
//!
//! A background task owns the socket. Outbound requests reach it through
//! [`WsSink`]; every inbound text frame is decoded as JSON and forwarded as
//! [`Inbound::Frame`]. Socket failures are forwarded once as
//! [`Inbound::Error`] and end the task. There is no reconnect: subscription
//! ids do not survive a new connection, so recovery is a process restart.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::push::{Inbound, PushSink};
use crate::request::JsonRpcRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send(String),
    Close,
}

/// Connector for the WebSocket push transport.
pub struct WsPushTransport;

impl WsPushTransport {
    /// Connect to `url` and start the background task.
    ///
    /// Returns the outbound sink and the inbound event channel.
    pub async fn connect(
        url: &str,
    ) -> Result<(WsSink, mpsc::UnboundedReceiver<Inbound>), TransportError> {
        tracing::info!(url = %url, "connecting via WebSocket");
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let task_url = url.to_string();
        tokio::spawn(async move {
            ws_task(task_url, stream, cmd_rx, inbound_tx).await;
        });

        Ok((
            WsSink {
                url: url.to_string(),
                cmd_tx,
            },
            inbound_rx,
        ))
    }
}

/// Outbound half of a WebSocket push transport.
///
/// Dropping the sink closes the socket.
pub struct WsSink {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
}

impl WsSink {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the socket. Idempotent; later sends fail with `Closed`.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

impl Drop for WsSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl PushSink for WsSink {
    async fn send(&self, req: JsonRpcRequest) -> Result<(), TransportError> {
        let text = serde_json::to_string(&req)?;
        self.cmd_tx
            .send(WsCommand::Send(text))
            .map_err(|_| TransportError::Closed("WS task closed".into()))
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "WS close frame not delivered");
                    }
                    tracing::info!(url = %url, "Successfully closed websocket");
                    return;
                }
                Some(WsCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "WS send failed");
                        let _ = inbound.send(Inbound::Error(TransportError::WebSocket(e.to_string())));
                        return;
                    }
                }
            },
            msg = stream.next() => match msg {
                None => {
                    tracing::warn!(url = %url, "WS stream ended");
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WS receive error");
                    let _ = inbound.send(Inbound::Error(TransportError::WebSocket(e.to_string())));
                    return;
                }
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(frame) => {
                        if inbound.send(Inbound::Frame(frame)).is_err() {
                            tracing::debug!("inbound receiver dropped, stopping WS task");
                            return;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "discarding non-JSON WS frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "peer closed the connection".into());
                    let _ = inbound.send(Inbound::Error(TransportError::Closed(reason)));
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
