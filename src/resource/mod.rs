//! # Demand-driven resource managers.
//!
//! A demand-driven resource couples the lifetime of an external connection to
//! subscriber demand on a [`Store`]: the connection opens when the subscriber
//! count rises from zero and closes when it returns to zero. Three variants
//! share the contract:
//!
//! - [`Feed`] — inbound server-push feed with optional auto-reconnect
//! - [`Bridge`] — synchronous bridge from an [`EventTarget`] capability
//! - [`Channel`] — bidirectional reconnecting socket channel (JSON wire)
//!
//! ## Architecture
//! ```text
//! transport ──► pump task ──► decode ──► Store<Update<T>>.set()
//!                                              │ sync fan-out
//!                                              ▼
//!                                         subscribers
//!                                              │ count 0⇄1
//!                                              ▼
//!                                   has_subscribers: Store<bool>
//!                                              │ edge command
//!                                              ▼
//!                              control loop ── connect / disconnect
//! ```
//!
//! ## Rules
//! - Connection invariant: session open ⇔ demand ∧ endpoint ∧ not destroyed
//!   (a queued outbound send counts as demand until it is flushed).
//! - Transport failures are **values**: they arrive at subscribers as
//!   [`Update::Error`], never as panics or async throws.
//! - Each resource owns at most one live session; sessions are recreated on
//!   every connect, never pooled.
//! - Reconnect delays are drawn fresh from the configured window on every
//!   attempt; no exponential growth, no retry ceiling.

mod bridge;
mod channel;
mod connector;
mod feed;
mod link;

pub use bridge::{Bridge, EventTarget, SourceToken};
pub use channel::{Channel, ChannelOptions, ChannelRegistry, RepeatHandle};
pub use connector::{Connect, Frame, Session, TcpLineConnector};
pub use feed::{Feed, FeedOptions};
pub use link::ReconnectPolicy;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::TransportError;
use crate::offs::Off;
use crate::store::Store;

/// Value envelope delivered through a resource's store.
///
/// Transport failures travel through the same channel as payloads, so
/// consumers observe them like any other update (see
/// [`TransportError`](crate::TransportError)).
#[derive(Clone, Debug, PartialEq)]
pub enum Update<T> {
    /// No value: nothing received yet, endpoint cleared, or destroyed.
    Null,
    /// A decoded payload.
    Value(T),
    /// A normalized transport failure.
    Error(TransportError),
}

impl<T> Update<T> {
    /// The payload, if this update carries one.
    pub fn value(&self) -> Option<&T> {
        match self {
            Update::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if this update carries one.
    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Update::Error(error) => Some(error),
            _ => None,
        }
    }

    /// True for [`Update::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Update::Null)
    }
}

/// Payload decoder: total function from inbound text to an [`Update`].
///
/// Decode failures are not exceptional; they come back as
/// [`Update::Error`] and fan out like any other value.
pub(crate) type Decoder<T> = Arc<dyn Fn(&str) -> Update<T> + Send + Sync>;

/// The default JSON decoder used by [`Feed`] and [`Channel`].
pub(crate) fn json_decoder<T: DeserializeOwned>() -> Decoder<T> {
    Arc::new(|text: &str| match serde_json::from_str::<T>(text) {
        Ok(value) => Update::Value(value),
        Err(e) => Update::Error(TransportError::Decode {
            reason: e.to_string(),
        }),
    })
}

/// Subscribes `store` and forwards every [`Update::Error`] to the `log`
/// sink at warn level.
///
/// This is the diagnostic tap for resource stores: formatting and routing
/// stay in the logger implementation.
pub fn log_errors<T: Clone + Send + Sync + 'static>(store: &Store<Update<T>>) -> Off {
    store.subscribe(|update| {
        if let Update::Error(error) = update {
            log::warn!("transport error [{}]: {error}", error.as_label());
        }
    })
}
