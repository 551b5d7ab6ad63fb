//! # livecell
//!
//! **livecell** provides reactive value cells with a demand-driven
//! connection lifecycle.
//!
//! At the center is [`Store`], a value cell with ordered synchronous
//! subscriber fan-out and a nested boolean demand store
//! ([`Store::has_subscribers`]). Around it, a family of resource managers
//! keeps an external connection open exactly while the store has
//! subscribers, opening on the 0→1 demand edge and closing on 1→0.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        external source                    external socket
//!      (server-push feed)                  (bidirectional)
//!              │                                  │
//!      ┌───────▼────────┐                ┌────────▼────────┐
//!      │     Feed<T>    │                │   Channel<T>    │   Bridge<T>
//!      │  (inbound)     │                │ (JSON both ways)│  (event target)
//!      └───────┬────────┘                └────────┬────────┘
//!              │        decode → Update<T>        │
//!              └───────────────┬──────────────────┘
//!                              ▼
//!                    Store<Update<T>>.set()
//!                              │  synchronous fan-out, subscription order
//!                              ▼
//!                         subscribers
//!                              │  count crosses 0 ⇄ 1
//!                              ▼
//!                 has_subscribers: Store<bool>
//!                              │  demand edge
//!                              ▼
//!              control loop: connect / disconnect / reconnect
//! ```
//!
//! ### Lifecycle
//! ```text
//! subscribe (0→1) ──► connect        unsubscribe (1→0) ──► disconnect
//! configure(url)  ──► (re)connect if demand
//! configure(None) ──► disconnect, value = Null
//! connection lost ──► Update::Error to subscribers
//!                     └─ auto-reconnect: retry after a fresh delay draw
//! destroy()       ──► disconnect, value = Null, subscriptions released,
//!                     every further operation → AlreadyDestroyed
//! ```
//!
//! ## Features
//! | Area            | Description                                             | Key types                                |
//! |-----------------|---------------------------------------------------------|------------------------------------------|
//! | **Stores**      | Observable value cells with demand tracking.            | [`Store`], [`SubscribeOpts`]             |
//! | **Completion**  | Cancellable, timeout-capable deferred values.           | [`Deferred`], [`Rejection`]              |
//! | **Resources**   | Demand-driven connection managers.                      | [`Feed`], [`Channel`], [`Bridge`]        |
//! | **Transports**  | Narrow capability traits + built-in TCP line transport. | [`Connect`], [`Session`], [`Frame`]      |
//! | **Teardown**    | Idempotent unsubscribe handles and aggregation.         | [`Off`], [`Offs`]                        |
//! | **Transitions** | Externally driven step sequences with hooks.            | [`Transition`], [`StepOutcome`]          |
//! | **Errors**      | Misuse vs transport vs transition taxonomy.             | [`StateError`], [`TransportError`]       |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use livecell::{Feed, FeedOptions, TcpLineConnector, Update};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let feed: Feed<f64> = Feed::new(
//!         Arc::new(TcpLineConnector),
//!         FeedOptions::default()
//!             .with_url("rates.internal:9000")
//!             .with_auto_reconnect(),
//!     );
//!
//!     // Nothing connects until the first subscriber arrives.
//!     let _off = feed.subscribe(|update| match update {
//!         Update::Value(rate) => println!("rate: {rate}"),
//!         Update::Error(err) => eprintln!("feed: {err}"),
//!         Update::Null => {}
//!     });
//!
//!     // ... the connection now follows subscriber demand.
//! }
//! ```

mod deferred;
mod error;
mod offs;
mod resource;
mod store;
mod transition;

// ---- Public re-exports ----

pub use deferred::{Deferred, Rejection};
pub use error::{StateError, TransitionError, TransportError};
pub use offs::{Off, Offs};
pub use resource::{
    log_errors, Bridge, Channel, ChannelOptions, ChannelRegistry, Connect, EventTarget, Feed,
    FeedOptions, Frame, ReconnectPolicy, RepeatHandle, Session, SourceToken, TcpLineConnector,
    Update,
};
pub use store::{Store, SubscribeOpts};
pub use transition::{StepOutcome, Transition};
