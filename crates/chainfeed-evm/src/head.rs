//! Head channel — the `newHeads` subscription protocol over a push transport.
//!
//! A background classifier task consumes the transport's [`Inbound`] events,
//! decodes each frame with [`Frame::decode`], and applies it to the shared
//! protocol state:
//!
//! - until a subscription id is held, the only acceptable frame is the
//!   subscribe acknowledgment; anything else is a fatal protocol error
//! - afterwards unsubscribe acks unblock [`HeadChannel::unsubscribe`],
//!   informational responses are logged, and head notifications resolve the
//!   single outstanding [`HeadChannel::wait_for_next_block`] waiter
//!
//! Head signals are not queued: with no waiter registered they are dropped.
//! Errors are queued (one at a time) for the next waiter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chainfeed_core::error::ConnectorError;
use chainfeed_core::state::SubscriptionState;
use chainfeed_core::types::SubscriptionId;
use chainfeed_rpc::push::{Inbound, PushSink};

use crate::fetcher::{parse_hex_u64, transport_err};
use crate::frame::{chain_id_request, subscribe_request, unsubscribe_request, Frame};

type Reply = oneshot::Sender<Result<(), ConnectorError>>;

fn closed_err() -> ConnectorError {
    ConnectorError::Transport("push transport closed".into())
}

#[derive(Default)]
struct Shared {
    state: SubscriptionState,
    subscription_id: Option<SubscriptionId>,
    subscribe_ack: Option<Reply>,
    unsubscribe_ack: Option<Reply>,
    waiter: Option<Reply>,
    queued_error: Option<ConnectorError>,
    closed: bool,
}

impl Shared {
    /// Fail any pending acknowledgment, then hand `err` to the waiter or queue it.
    fn deliver_error(&mut self, mut err: ConnectorError) {
        if let Some(tx) = self.subscribe_ack.take() {
            let _ = tx.send(Err(err.clone()));
        }
        if let Some(tx) = self.unsubscribe_ack.take() {
            let _ = tx.send(Err(err.clone()));
        }
        if let Some(tx) = self.waiter.take() {
            match tx.send(Err(err)) {
                Ok(()) => return,
                Err(returned) => match returned {
                    Err(e) => err = e,
                    Ok(()) => return,
                },
            }
        }
        if self.queued_error.is_none() {
            self.queued_error = Some(err);
        } else {
            tracing::warn!(error = %err, "error already queued for the next waiter; dropping");
        }
    }

    fn apply(&mut self, value: serde_json::Value) {
        if self.subscription_id.is_none() {
            let raw = value.to_string();
            match Frame::decode(value) {
                Frame::SubscribeAck { subscription } => {
                    tracing::debug!(subscription = %subscription, "subscribe acknowledged");
                    self.subscription_id = Some(subscription);
                    self.state = SubscriptionState::Subscribed;
                    if let Some(tx) = self.subscribe_ack.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                other => self.deliver_error(ConnectorError::Protocol(format!(
                    "failed to set subscription ID: expected a subscribe acknowledgment, got {} frame {raw}",
                    other.kind()
                ))),
            }
            return;
        }

        match Frame::decode(value) {
            Frame::UnsubscribeAck { removed } => {
                tracing::debug!(removed, "unsubscribe acknowledged");
                if self.state == SubscriptionState::UnsubscribePending {
                    self.state = SubscriptionState::Unsubscribed;
                }
                match self.unsubscribe_ack.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => tracing::debug!("unsolicited unsubscribe acknowledgment"),
                }
            }
            Frame::Info { id, result } => match parse_hex_u64(&result) {
                Some(chain_id) if id == crate::frame::CHAIN_ID_REQUEST_ID => {
                    tracing::info!(chain_id, "Chain ID")
                }
                _ => tracing::info!(id, result = %result, "informational response"),
            },
            Frame::NewHead { subscription, number } => {
                tracing::debug!(subscription = %subscription, number, "head notification");
                match self.waiter.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => tracing::trace!(number, "no waiter registered; head signal dropped"),
                }
            }
            Frame::SubscribeAck { subscription } => {
                tracing::warn!(subscription = %subscription, "Ignoring repeated subscribe acknowledgment")
            }
            Frame::Unrecognized(value) => tracing::warn!(frame = %value, "Ignoring event"),
        }
    }
}

/// Subscription to head-change notifications over a push transport.
///
/// `subscribe` and `unsubscribe` are not reentrant with each other; at most one
/// `wait_for_next_block` may be outstanding.
pub struct HeadChannel<P: PushSink> {
    sink: P,
    shared: Arc<Mutex<Shared>>,
    classifier: JoinHandle<()>,
}

impl<P: PushSink> HeadChannel<P> {
    /// Wrap a push transport and start classifying its inbound events.
    pub fn new(sink: P, mut inbound: mpsc::UnboundedReceiver<Inbound>) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let task_shared = Arc::clone(&shared);
        let classifier = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let mut s = task_shared.lock().unwrap_or_else(PoisonError::into_inner);
                match event {
                    Inbound::Frame(value) => s.apply(value),
                    Inbound::Error(e) => {
                        tracing::warn!(error = %e, "push transport error");
                        s.deliver_error(transport_err(e));
                    }
                }
            }
            let mut s = task_shared.lock().unwrap_or_else(PoisonError::into_inner);
            s.closed = true;
            s.deliver_error(closed_err());
            tracing::debug!("head channel classifier stopped");
        });

        Self {
            sink,
            shared,
            classifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SubscriptionState {
        self.lock().state
    }

    /// The underlying push transport.
    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// The id assigned by the first subscribe acknowledgment.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.lock().subscription_id.clone()
    }

    /// Returns `true` while a `wait_for_next_block` call is outstanding.
    pub fn has_waiter(&self) -> bool {
        self.lock().waiter.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Subscribe to new heads and wait for the acknowledgment.
    ///
    /// A no-op while a subscribe is pending or acknowledged; a subscribe whose
    /// send failed may be retried. Fails immediately once the transport has
    /// closed. Returns `Ok(())` without a subscription if `cancel` fires first.
    pub async fn subscribe(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        let ack = {
            let mut s = self.lock();
            if s.state != SubscriptionState::Unsubscribed || s.subscription_id.is_some() {
                tracing::debug!(state = %s.state, "subscribe already issued");
                return Ok(());
            }
            if s.closed {
                return Err(closed_err());
            }
            s.state = SubscriptionState::SubscribePending;
            let (tx, rx) = oneshot::channel();
            s.subscribe_ack = Some(tx);
            rx
        };

        if let Err(e) = self.sink.send(subscribe_request()).await {
            let mut s = self.lock();
            s.state = SubscriptionState::Unsubscribed;
            s.subscribe_ack = None;
            return Err(transport_err(e));
        }

        tokio::select! {
            biased;
            reply = ack => reply.map_err(|_| closed_err())??,
            _ = cancel.cancelled() => {
                tracing::info!("subscribe cancelled before acknowledgment");
                return Ok(());
            }
        }

        if let Some(id) = self.subscription_id() {
            tracing::info!(subscription = %id, "Subscription ID");
        }
        if let Err(e) = self.sink.send(chain_id_request()).await {
            tracing::warn!(error = %e, "chain id probe not sent");
        }
        Ok(())
    }

    /// Cancel the subscription and wait for the acknowledgment.
    ///
    /// A no-op if never subscribed. Fails immediately once the transport has
    /// closed. Returns `Ok(())` if `cancel` fires first.
    pub async fn unsubscribe(&self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        let (id, ack) = {
            let mut s = self.lock();
            let Some(id) = s.subscription_id.clone() else {
                tracing::debug!("never subscribed; nothing to unsubscribe");
                return Ok(());
            };
            if s.state != SubscriptionState::Subscribed {
                tracing::debug!(state = %s.state, "unsubscribe skipped");
                return Ok(());
            }
            if s.closed {
                return Err(closed_err());
            }
            s.state = SubscriptionState::UnsubscribePending;
            let (tx, rx) = oneshot::channel();
            s.unsubscribe_ack = Some(tx);
            (id, rx)
        };

        if let Err(e) = self.sink.send(unsubscribe_request(&id)).await {
            let mut s = self.lock();
            s.state = SubscriptionState::Subscribed;
            s.unsubscribe_ack = None;
            return Err(transport_err(e));
        }

        tokio::select! {
            biased;
            reply = ack => {
                reply.map_err(|_| closed_err())??;
                tracing::info!(subscription = %id, "Successfully closed subscription");
            }
            _ = cancel.cancelled() => {
                tracing::info!(subscription = %id, "unsubscribe abandoned before acknowledgment");
            }
        }
        Ok(())
    }

    /// Suspend until the chain may have advanced.
    ///
    /// Fails with a queued or incoming transport/protocol error, and with
    /// [`ConnectorError::Usage`] if another waiter is still outstanding.
    pub async fn wait_for_next_block(&self) -> Result<(), ConnectorError> {
        let rx = {
            let mut s = self.lock();
            if let Some(err) = s.queued_error.take() {
                return Err(err);
            }
            if s.closed {
                return Err(closed_err());
            }
            if s.waiter.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(ConnectorError::Usage(
                    "wait_for_next_block called while another waiter is outstanding".into(),
                ));
            }
            let (tx, rx) = oneshot::channel();
            s.waiter = Some(tx);
            rx
        };
        rx.await.map_err(|_| closed_err())?
    }
}

impl<P: PushSink> Drop for HeadChannel<P> {
    fn drop(&mut self) {
        self.classifier.abort();
    }
}
