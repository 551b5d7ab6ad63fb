//! # Feed: a demand-driven server-push feed.
//!
//! [`Feed`] keeps an inbound push connection open exactly while its store
//! has subscribers and an endpoint is configured. Payload frames are decoded
//! (JSON by default) and fanned out; transport failures arrive as
//! [`Update::Error`] values.
//!
//! Reconnection is opt-in: with [`FeedOptions::auto_reconnect`] the feed
//! schedules a fresh connect after every connection loss, at a fixed delay.
//! Without it, a lost feed stays down until [`Feed::reconnect`] or the next
//! demand edge.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use livecell::{Feed, FeedOptions, TcpLineConnector, Update};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let feed: Feed<u64> = Feed::new(
//!     Arc::new(TcpLineConnector),
//!     FeedOptions::default().with_url("prices.internal:9000"),
//! );
//!
//! // Nothing is connected yet: no subscribers.
//! let _off = feed.subscribe(|update| {
//!     if let Update::Value(price) = update {
//!         println!("price: {price}");
//!     }
//! });
//! // First subscriber → the connection opens.
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::StateError;
use crate::offs::Off;
use crate::store::Store;

use super::connector::Connect;
use super::link::{Link, LinkOptions, ReconnectPolicy};
use super::{json_decoder, Decoder, Update};

/// Construction options for a [`Feed`].
#[derive(Clone, Debug)]
pub struct FeedOptions {
    /// Initial endpoint; `None` leaves the feed unconfigured.
    pub url: Option<String>,
    /// Reconnect automatically after a connection loss.
    pub auto_reconnect: bool,
    /// Delay used for automatic and default manual reconnects.
    pub reconnect_delay: Duration,
}

impl Default for FeedOptions {
    /// No endpoint, no auto-reconnect, 3s reconnect delay.
    fn default() -> Self {
        Self {
            url: None,
            auto_reconnect: false,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl FeedOptions {
    /// Sets the initial endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Enables automatic reconnection after connection loss.
    pub fn with_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = true;
        self
    }

    /// Overrides the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Demand-driven inbound push feed.
///
/// Cheap to clone; all clones drive the same connection.
pub struct Feed<T> {
    link: Arc<Link<T>>,
    reconnect_delay: Duration,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

impl<T: DeserializeOwned + Clone + Send + Sync + 'static> Feed<T> {
    /// Creates a feed decoding payloads as JSON.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(connector: Arc<dyn Connect>, opts: FeedOptions) -> Self {
        Self::from_decoder(connector, opts, json_decoder())
    }
}

impl<T: Clone + Send + Sync + 'static> Feed<T> {
    /// Creates a feed with a custom payload decoder.
    ///
    /// The decoder is total: decode failures come back as
    /// [`Update::Error`], not panics.
    pub fn with_decoder(
        connector: Arc<dyn Connect>,
        opts: FeedOptions,
        decode: impl Fn(&str) -> Update<T> + Send + Sync + 'static,
    ) -> Self {
        Self::from_decoder(connector, opts, Arc::new(decode) as Decoder<T>)
    }

    fn from_decoder(connector: Arc<dyn Connect>, opts: FeedOptions, decode: Decoder<T>) -> Self {
        let reconnect_delay = opts.reconnect_delay;
        let link = Link::spawn(
            connector,
            LinkOptions {
                url: opts.url,
                auto_reconnect: opts.auto_reconnect,
                reconnect: ReconnectPolicy::fixed(reconnect_delay),
                decode,
            },
            Update::Null,
        );
        Self {
            link,
            reconnect_delay,
        }
    }

    /// The feed's value store.
    pub fn store(&self) -> Store<Update<T>> {
        self.link.store()
    }

    /// Current value. No side effects.
    pub fn get(&self) -> Update<T> {
        self.link.store().get()
    }

    /// Subscribes to the value store.
    ///
    /// The first subscriber opens the connection (once an endpoint is set);
    /// the last unsubscribe closes it.
    pub fn subscribe(&self, call: impl Fn(&Update<T>) + Send + Sync + 'static) -> Off {
        self.link.store().subscribe(call)
    }

    /// Observable connection state.
    pub fn connected(&self) -> Store<bool> {
        self.link.connected_store()
    }

    /// Sets or clears the endpoint.
    ///
    /// - `None` disconnects and clears the value to [`Update::Null`].
    /// - A different endpoint while connected disconnects first, then
    ///   reconnects only if subscribers remain.
    /// - An endpoint set while subscribers exist and nothing is connected
    ///   connects immediately.
    pub fn configure(&self, url: Option<impl Into<String>>) -> Result<(), StateError> {
        self.link.configure(url.map(Into::into))
    }

    /// Disconnects immediately, then reconnects after the configured
    /// default delay.
    pub fn reconnect(&self) -> Result<(), StateError> {
        self.link.reconnect(self.reconnect_delay)
    }

    /// Disconnects immediately, then reconnects after `delay`.
    pub fn reconnect_after(&self, delay: Duration) -> Result<(), StateError> {
        self.link.reconnect(delay)
    }

    /// Disconnects, clears the value, releases every subscription, and
    /// marks the feed permanently unusable. Subsequent operations return
    /// [`StateError::AlreadyDestroyed`].
    pub async fn destroy(&self) -> Result<(), StateError> {
        self.link.destroy().await
    }

    /// Idempotent [`destroy`](Feed::destroy): returns whether this call
    /// performed the teardown.
    pub async fn try_destroy(&self) -> bool {
        self.link.try_destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{settle, MemoryConnector};
    use crate::resource::Frame;
    use std::sync::Mutex;

    fn feed_with(opts: FeedOptions) -> (Feed<u32>, Arc<Mutex<crate::resource::testing::Shared>>) {
        let (connector, shared) = MemoryConnector::new();
        (Feed::new(Arc::new(connector), opts), shared)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn no_subscribers_means_no_connection() {
        let (_feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn demand_edges_open_and_close_the_connection() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));

        let mut off = feed.subscribe(|_| {});
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);
        assert!(feed.connected().get());

        // A second subscriber does not reconnect.
        let mut off2 = feed.subscribe(|_| {});
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);

        off2.call();
        settle().await;
        assert_eq!(shared.lock().unwrap().closes, 0);

        off.call();
        settle().await;
        let state = shared.lock().unwrap();
        assert_eq!(state.closes, 1);
        assert!(!state.is_live());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn payloads_are_decoded_and_fanned_out() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));
        let seen: Arc<Mutex<Vec<Update<u32>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _off = feed.subscribe(move |u| sink.lock().unwrap().push(u.clone()));
        settle().await;

        shared.lock().unwrap().push(Frame::Message("42".to_string()));
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&Update::Null)); // initial call
        assert_eq!(seen.last(), Some(&Update::Value(42)));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transport_errors_arrive_as_values() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));
        let _off = feed.subscribe(|_| {});
        settle().await;

        shared
            .lock()
            .unwrap()
            .push(Frame::Error("stream reset".to_string()));
        settle().await;

        let error = feed.get().error().cloned().expect("error update");
        assert_eq!(error.as_label(), "transport_stream");
        assert_eq!(error.url(), Some("mem://feed"));

        // Without auto-reconnect, the feed stays down.
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);
        assert!(!feed.connected().get());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn auto_reconnect_reopens_after_loss() {
        let (feed, shared) = feed_with(
            FeedOptions::default()
                .with_url("mem://feed")
                .with_auto_reconnect()
                .with_reconnect_delay(Duration::from_secs(3)),
        );
        let _off = feed.subscribe(|_| {});
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);

        shared.lock().unwrap().close_remote();
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(shared.lock().unwrap().opens, 2);
        assert!(feed.connected().get());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn clearing_the_endpoint_disconnects_and_nulls() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));
        let _off = feed.subscribe(|_| {});
        settle().await;

        shared.lock().unwrap().push(Frame::Message("7".to_string()));
        settle().await;
        assert_eq!(feed.get(), Update::Value(7));

        feed.configure(None::<String>).unwrap();
        settle().await;
        assert_eq!(feed.get(), Update::Null);
        assert_eq!(shared.lock().unwrap().closes, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn switching_endpoints_reconnects_under_demand() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://a"));
        let _off = feed.subscribe(|_| {});
        settle().await;
        assert_eq!(shared.lock().unwrap().opens, 1);

        feed.configure(Some("mem://b")).unwrap();
        settle().await;
        let state = shared.lock().unwrap();
        assert_eq!(state.closes, 1);
        assert_eq!(state.opens, 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn manual_reconnect_cycles_the_connection() {
        let (feed, shared) = feed_with(
            FeedOptions::default()
                .with_url("mem://feed")
                .with_reconnect_delay(Duration::from_secs(1)),
        );
        let _off = feed.subscribe(|_| {});
        settle().await;

        feed.reconnect().unwrap();
        settle().await;
        assert_eq!(shared.lock().unwrap().closes, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(shared.lock().unwrap().opens, 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn destroy_is_terminal() {
        let (feed, shared) = feed_with(FeedOptions::default().with_url("mem://feed"));
        let _off = feed.subscribe(|_| {});
        settle().await;

        feed.destroy().await.unwrap();
        settle().await;
        assert_eq!(feed.get(), Update::Null);
        assert_eq!(shared.lock().unwrap().closes, 1);

        assert_eq!(
            feed.configure(Some("mem://other")),
            Err(StateError::AlreadyDestroyed)
        );
        assert_eq!(feed.reconnect(), Err(StateError::AlreadyDestroyed));
        assert_eq!(feed.destroy().await, Err(StateError::AlreadyDestroyed));
        assert!(!feed.try_destroy().await);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn custom_decoder_feeds_the_store() {
        let (connector, shared) = MemoryConnector::new();
        let feed: Feed<usize> = Feed::with_decoder(
            Arc::new(connector),
            FeedOptions::default().with_url("mem://len"),
            |text| Update::Value(text.len()),
        );
        let _off = feed.subscribe(|_| {});
        settle().await;

        shared
            .lock()
            .unwrap()
            .push(Frame::Message("four".to_string()));
        settle().await;
        assert_eq!(feed.get(), Update::Value(4));
    }
}
