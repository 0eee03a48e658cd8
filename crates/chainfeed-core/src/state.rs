//! Connector and subscription state machines.

use serde::{Deserialize, Serialize};

/// Runtime state of the connector.
///
/// `Starting → Subscribing → Initializing → CatchingUp ⇄ Waiting → Stopped`,
/// with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    /// Constructed, `run` not yet called.
    Starting,
    /// Waiting for the head subscription to be acknowledged.
    Subscribing,
    /// Resolving the starting cursor (or bootstrapping it).
    Initializing,
    /// The cursor lags the head; fetching without waiting.
    CatchingUp,
    /// At the head; suspended until the chain may have advanced.
    Waiting,
    /// Stopped by cancellation.
    Stopped,
    /// Stopped by a fatal error.
    Failed,
}

impl ConnectorState {
    /// Returns `true` for `Stopped` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Subscribing => write!(f, "subscribing"),
            Self::Initializing => write!(f, "initializing"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Waiting => write!(f, "waiting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Head subscription protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    SubscribePending,
    Subscribed,
    UnsubscribePending,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsubscribed => write!(f, "unsubscribed"),
            Self::SubscribePending => write!(f, "subscribe-pending"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::UnsubscribePending => write!(f, "unsubscribe-pending"),
        }
    }
}
