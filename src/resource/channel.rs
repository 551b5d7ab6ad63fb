//! # Channel: a demand-driven, reconnecting socket channel.
//!
//! [`Channel`] is the bidirectional member of the resource family. Values
//! travel as JSON in both directions: inbound frames are decoded and fanned
//! out through the store; outbound values are serialized and transmitted
//! with [`Channel::send`].
//!
//! ## Rules
//! - The connection follows subscriber demand like every resource, with one
//!   addition: a queued outbound send counts as demand, so sending on an
//!   idle channel transparently opens the connection, transmits, and
//!   releases the extra demand once the send completes. Messages are never
//!   silently dropped while idle.
//! - The channel always reconnects after a connection loss (while the
//!   invariant holds), at a delay drawn uniformly from
//!   `[min_reconnect_delay, max_reconnect_delay]` on every attempt. Fresh
//!   draws spread mass reconnection of many clients across the window.
//! - [`ChannelRegistry`] is an explicit `label → channel` registry owned by
//!   the calling context, for shared lookup and teardown.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use livecell::{Channel, ChannelOptions, TcpLineConnector};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let channel: Channel<serde_json::Value> = Channel::new(
//!     Arc::new(TcpLineConnector),
//!     ChannelOptions::new("control.internal:9100").with_label("control"),
//! );
//!
//! // Opens the connection, transmits, then lets it close again.
//! let done = channel.send(&serde_json::json!({"op": "ping"})).unwrap();
//! done.wait().await.unwrap();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::deferred::{Deferred, Rejection};
use crate::error::StateError;
use crate::offs::Off;
use crate::store::Store;

use super::connector::Connect;
use super::link::{Link, LinkOptions, ReconnectPolicy};
use super::{json_decoder, Update};

/// Global counter for generated registry labels.
static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Construction options for a [`Channel`].
#[derive(Clone, Debug)]
pub struct ChannelOptions<T> {
    /// Registry label; `None` draws a generated token on insertion.
    pub label: Option<String>,
    /// Endpoint of the channel.
    pub url: String,
    /// Value the store holds before anything is received.
    pub initial: Option<T>,
    /// Lower bound of the reconnect delay window.
    pub min_reconnect_delay: Duration,
    /// Upper bound of the reconnect delay window.
    pub max_reconnect_delay: Duration,
}

impl<T> ChannelOptions<T> {
    /// Options for `url` with the default `[10s, 20s]` reconnect window.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            label: None,
            url: url.into(),
            initial: None,
            min_reconnect_delay: Duration::from_secs(10),
            max_reconnect_delay: Duration::from_secs(20),
        }
    }

    /// Sets the registry label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the initial store value.
    pub fn with_initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Overrides the reconnect delay window.
    pub fn with_reconnect_window(mut self, min: Duration, max: Duration) -> Self {
        self.min_reconnect_delay = min;
        self.max_reconnect_delay = max;
        self
    }
}

/// Demand-driven bidirectional socket channel (JSON wire format).
///
/// Cheap to clone; all clones drive the same connection.
pub struct Channel<T> {
    link: Arc<Link<T>>,
    label: Option<Arc<str>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            label: self.label.clone(),
        }
    }
}

impl<T> Channel<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a channel. Nothing connects until demand arrives (a
    /// subscriber or an outbound send).
    ///
    /// Must be called within a tokio runtime.
    pub fn new(connector: Arc<dyn Connect>, opts: ChannelOptions<T>) -> Self {
        let initial = match opts.initial {
            Some(value) => Update::Value(value),
            None => Update::Null,
        };
        let link = Link::spawn(
            connector,
            LinkOptions {
                url: Some(opts.url),
                auto_reconnect: true,
                reconnect: ReconnectPolicy::window(
                    opts.min_reconnect_delay,
                    opts.max_reconnect_delay,
                ),
                decode: json_decoder(),
            },
            initial,
        );
        Self {
            link,
            label: opts.label.map(|l| Arc::from(l.as_str())),
        }
    }

    /// Serializes `value` as JSON and transmits it.
    ///
    /// With no open connection, the queued send raises demand so one opens
    /// transparently; the extra demand is released once the send completes.
    /// The returned deferred resolves on transmission and rejects on
    /// connection loss or teardown.
    pub fn send(&self, value: &T) -> Result<Deferred<()>, StateError> {
        self.link.ensure_alive()?;
        match serde_json::to_string(value) {
            Ok(text) => self.link.send(text),
            Err(e) => {
                let done = Deferred::new();
                done.try_reject(Rejection::error(format!("encode failed: {e}")));
                Ok(done)
            }
        }
    }

    /// Alias of [`send`](Channel::send), mirroring the store vocabulary for
    /// outbound values.
    pub fn set(&self, value: &T) -> Result<Deferred<()>, StateError> {
        self.send(value)
    }

    /// Re-evaluates `supply` and re-sends the result on a fixed interval
    /// (first send immediately) until the handle is cancelled or the
    /// channel is destroyed.
    pub fn set_repeated(
        &self,
        every: Duration,
        supply: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<RepeatHandle, StateError> {
        self.link.ensure_alive()?;
        let token = self.link.child_token();
        let channel = self.clone();
        let guard = token.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    _ = tick.tick() => {
                        if channel.send(&supply()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(RepeatHandle { token })
    }

    /// The channel's value store.
    pub fn store(&self) -> Store<Update<T>> {
        self.link.store()
    }

    /// Current value. No side effects.
    pub fn get(&self) -> Update<T> {
        self.link.store().get()
    }

    /// Subscribes to the value store.
    ///
    /// The first subscriber opens the connection; the last unsubscribe
    /// closes it (once no sends are queued).
    pub fn subscribe(&self, call: impl Fn(&Update<T>) + Send + Sync + 'static) -> Off {
        self.link.store().subscribe(call)
    }

    /// Observable connection state.
    pub fn connected(&self) -> Store<bool> {
        self.link.connected_store()
    }

    /// Sets or clears the endpoint (same contract as
    /// [`Feed::configure`](super::Feed::configure)).
    pub fn configure(&self, url: Option<impl Into<String>>) -> Result<(), StateError> {
        self.link.configure(url.map(Into::into))
    }

    /// Disconnects immediately, then reconnects after `delay`.
    pub fn reconnect_after(&self, delay: Duration) -> Result<(), StateError> {
        self.link.reconnect(delay)
    }

    /// Registry label, when one was configured.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Disconnects, clears the value, releases every subscription, cancels
    /// repeat loops, and marks the channel permanently unusable.
    pub async fn destroy(&self) -> Result<(), StateError> {
        self.link.destroy().await
    }

    /// Idempotent [`destroy`](Channel::destroy): returns whether this call
    /// performed the teardown.
    pub async fn try_destroy(&self) -> bool {
        self.link.try_destroy().await
    }
}

/// Cancellation handle for a [`Channel::set_repeated`] loop.
///
/// The loop runs until [`cancel`](RepeatHandle::cancel) or channel
/// destruction; dropping the handle does not stop it.
#[derive(Clone, Debug)]
pub struct RepeatHandle {
    token: CancellationToken,
}

impl RepeatHandle {
    /// Stops the repeat loop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once cancelled (directly or via channel destruction).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Explicit `label → channel` registry.
///
/// Owned and passed around by the calling context rather than living as a
/// process-wide singleton, keeping lifecycle and test isolation explicit.
pub struct ChannelRegistry<T> {
    inner: Mutex<HashMap<String, Channel<T>>>,
}

impl<T> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChannelRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Registered labels, unordered.
    pub fn labels(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }
}

impl<T> ChannelRegistry<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Registers `channel` under its configured label (a generated token
    /// when it has none) and returns the label.
    ///
    /// Returns [`StateError::DuplicateLabel`] when the label is taken.
    pub fn insert(&self, channel: Channel<T>) -> Result<String, StateError> {
        let label = match channel.label() {
            Some(label) => label.to_string(),
            None => format!("channel-{}", CHANNEL_SEQ.fetch_add(1, AtomicOrdering::Relaxed)),
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&label) {
            return Err(StateError::DuplicateLabel { label });
        }
        inner.insert(label.clone(), channel);
        Ok(label)
    }

    /// Looks up a channel by label.
    pub fn get(&self, label: &str) -> Option<Channel<T>> {
        self.inner.lock().unwrap().get(label).cloned()
    }

    /// Removes and returns a channel by label.
    pub fn remove(&self, label: &str) -> Option<Channel<T>> {
        self.inner.lock().unwrap().remove(label)
    }

    /// Destroys every registered channel and empties the registry.
    pub async fn destroy_all(&self) {
        let channels: Vec<Channel<T>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.drain().map(|(_, channel)| channel).collect()
        };
        for channel in channels {
            channel.try_destroy().await;
        }
    }
}
