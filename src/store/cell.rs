//! # Store: a value cell with ordered synchronous fan-out.
//!
//! [`Store`] holds one value and a list of subscriber callbacks. Every
//! [`set`](Store::set) replaces the value and notifies every currently
//! registered subscriber synchronously, in subscription order, with the new
//! value.
//!
//! ## Rules
//! - **Snapshot fan-out**: the subscriber list is snapshotted when `set`
//!   begins; subscribe/unsubscribe calls made *by* a callback never affect
//!   the in-flight pass.
//! - **No equality gate**: every `set` notifies, even when the new value
//!   equals the old one.
//! - **Demand edges**: the nested [`has_subscribers`](Store::has_subscribers)
//!   store flips only on 0→1 and 1→0 subscriber-count transitions;
//!   intermediate counts never re-fire it.
//! - The inner lock is never held while user callbacks run, so callbacks may
//!   freely call back into the store.
//!
//! ## Example
//! ```
//! use std::sync::{Arc, Mutex};
//! use livecell::Store;
//!
//! let store = Store::new(0);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! let mut off = store.subscribe(move |v| sink.lock().unwrap().push(*v));
//!
//! store.set(5);
//! off.call();
//! store.set(9); // not observed
//!
//! assert_eq!(*seen.lock().unwrap(), vec![0, 5]);
//! assert!(!store.has_subscribers().get());
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::error::StateError;
use crate::offs::Off;

/// Global counter for subscription identities and anonymous labels.
static SUB_SEQ: AtomicU64 = AtomicU64::new(0);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    label: Arc<str>,
    id: u64,
    call: Callback<T>,
}

struct Inner<T> {
    value: T,
    subs: Vec<Entry<T>>,
    /// Nested demand store, created lazily on first access.
    demand: Option<Store<bool>>,
}

/// Options for [`Store::subscribe_with`].
#[derive(Clone, Debug, Default)]
pub struct SubscribeOpts {
    /// Explicit subscription label; unique per store. `None` draws a
    /// generated anonymous token.
    pub label: Option<String>,
    /// Skip the immediate synchronous invocation with the current value.
    pub skip_initial: bool,
}

impl SubscribeOpts {
    /// Options with an explicit label.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            skip_initial: false,
        }
    }

    /// Disables the immediate invocation on registration.
    pub fn without_initial_call(mut self) -> Self {
        self.skip_initial = true;
        self
    }
}

/// Observable value cell.
///
/// Cheap to clone (internally holds an `Arc`-backed cell); all clones share
/// the same value and subscriber list.
pub struct Store<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Creates a store holding `value`, with no subscribers.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                subs: Vec::new(),
                demand: None,
            })),
        }
    }

    /// Returns a clone of the current value. No side effects.
    pub fn get(&self) -> T {
        self.inner.lock().unwrap().value.clone()
    }

    /// Replaces the value, then notifies every currently registered
    /// subscriber in subscription order with the new value.
    ///
    /// Always notifies; there is no equality check on the old value. The
    /// subscriber list is snapshotted up front, so callbacks may subscribe,
    /// unsubscribe, or `set` again without affecting this pass.
    pub fn set(&self, value: T) {
        let snapshot: Vec<Callback<T>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.value = value.clone();
            inner.subs.iter().map(|e| Arc::clone(&e.call)).collect()
        };
        for call in snapshot {
            call(&value);
        }
    }

    /// Read-modify-write convenience over [`get`](Store::get) and
    /// [`set`](Store::set).
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.get());
        self.set(next);
    }

    /// Registers `call` with default options: generated label, immediate
    /// synchronous invocation with the current value before this returns.
    ///
    /// The returned [`Off`] is idempotent; calling it a second time is a
    /// no-op. Dropping it without calling keeps the subscription alive.
    pub fn subscribe(&self, call: impl Fn(&T) + Send + Sync + 'static) -> Off {
        match self.register(None, Arc::new(call), false) {
            Ok(off) => off,
            Err(_) => unreachable!("anonymous labels are unique"),
        }
    }

    /// Registers `call` with explicit [`SubscribeOpts`].
    ///
    /// Returns [`StateError::DuplicateLabel`] when the label is taken.
    ///
    /// Demand-edge ordering: on a 0→1 transition the nested
    /// [`has_subscribers`](Store::has_subscribers) store flips to `true`
    /// after the callback is registered and *before* the immediate
    /// invocation (when one happens).
    pub fn subscribe_with(
        &self,
        call: impl Fn(&T) + Send + Sync + 'static,
        opts: SubscribeOpts,
    ) -> Result<Off, StateError> {
        self.register(opts.label, Arc::new(call), opts.skip_initial)
    }

    fn register(
        &self,
        label: Option<String>,
        call: Callback<T>,
        skip_initial: bool,
    ) -> Result<Off, StateError> {
        let id = SUB_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        let edge = {
            let mut inner = self.inner.lock().unwrap();
            let label: Arc<str> = match label {
                Some(label) => {
                    if inner.subs.iter().any(|e| e.label.as_ref() == label) {
                        return Err(StateError::DuplicateLabel { label });
                    }
                    Arc::from(label.as_str())
                }
                None => Arc::from(format!("sub-{id}").as_str()),
            };
            let was_empty = inner.subs.is_empty();
            inner.subs.push(Entry {
                label,
                id,
                call: Arc::clone(&call),
            });
            if was_empty { inner.demand.clone() } else { None }
        };

        if let Some(demand) = edge {
            demand.set(true);
        }
        if !skip_initial {
            call(&self.get());
        }

        let store = self.clone();
        Ok(Off::new(move || store.remove_by_id(id)))
    }

    fn remove_by_id(&self, id: u64) {
        let edge = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.subs.len();
            inner.subs.retain(|e| e.id != id);
            if before == 1 && inner.subs.is_empty() {
                inner.demand.clone()
            } else {
                None
            }
        };
        if let Some(demand) = edge {
            demand.set(false);
        }
    }

    /// Clears every subscriber and drives the demand store to `false` in one
    /// step, with no per-subscriber flicker.
    pub fn unsubscribe_all(&self) {
        let edge = {
            let mut inner = self.inner.lock().unwrap();
            let had = !inner.subs.is_empty();
            inner.subs.clear();
            if had { inner.demand.clone() } else { None }
        };
        if let Some(demand) = edge {
            demand.set(false);
        }
    }

    /// The nested demand store: `true` exactly while at least one subscriber
    /// is registered.
    ///
    /// Created lazily on first access and seeded with the current state.
    /// Downstream components subscribe to it to react to demand edges
    /// without polling.
    pub fn has_subscribers(&self) -> Store<bool> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(demand) = &inner.demand {
            return demand.clone();
        }
        let demand = Store::new(!inner.subs.is_empty());
        inner.demand = Some(demand.clone());
        demand
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subs.len()
    }

    /// Derived store kept in sync through a permanent internal subscription.
    ///
    /// The derived store is seeded with `f` applied to the current value and
    /// re-derived on every `set` of this store. The internal subscription is
    /// never released, so this store reports demand for as long as the
    /// derived store exists.
    pub fn map<U, F>(&self, f: F) -> Store<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Store::new(f(&self.get()));
        let out = derived.clone();
        let _off = self.subscribe_with(
            move |value| out.set(f(value)),
            SubscribeOpts::default().without_initial_call(),
        );
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&seen);
        (seen, move |v: &T| writer.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn subscribe_invokes_once_synchronously_with_current_value() {
        let store = Store::new(41);
        let (seen, cb) = sink();
        let _off = store.subscribe(cb);
        assert_eq!(*seen.lock().unwrap(), vec![41]);
    }

    #[test]
    fn set_notifies_in_subscription_order() {
        let store = Store::new(0);
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let _a = store.subscribe_with(
            move |_| first.lock().unwrap().push("a"),
            SubscribeOpts::default().without_initial_call(),
        );
        let second = Arc::clone(&order);
        let _b = store.subscribe_with(
            move |_| second.lock().unwrap().push("b"),
            SubscribeOpts::default().without_initial_call(),
        );

        store.set(1);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn set_always_notifies_even_for_equal_values() {
        let store = Store::new(7);
        let (seen, cb) = sink();
        let _off = store.subscribe_with(cb, SubscribeOpts::default().without_initial_call());

        store.set(7);
        store.set(7);
        assert_eq!(*seen.lock().unwrap(), vec![7, 7]);
    }

    #[test]
    fn unsubscribe_during_notification_does_not_affect_the_pass() {
        let store = Store::new(0);
        let (seen, cb) = sink();

        // The first callback unsubscribes the second mid-pass; the second
        // still observes the in-flight value, but not the next one.
        let late_off: Arc<Mutex<Option<Off>>> = Arc::new(Mutex::new(None));
        let target = Arc::clone(&late_off);
        let _a = store.subscribe_with(
            move |_| {
                if let Some(off) = target.lock().unwrap().as_mut() {
                    off.call();
                }
            },
            SubscribeOpts::default().without_initial_call(),
        );
        let b = store
            .subscribe_with(cb, SubscribeOpts::default().without_initial_call())
            .unwrap();
        *late_off.lock().unwrap() = Some(b);

        store.set(1);
        store.set(2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn demand_edges_fire_only_on_zero_boundary() {
        let store = Store::new(0);
        let demand = store.has_subscribers();
        assert!(!demand.get());

        let (edges, cb) = sink();
        let _watch = demand.subscribe_with(cb, SubscribeOpts::default().without_initial_call());

        let mut a = store.subscribe(|_| {});
        let mut b = store.subscribe(|_| {}); // 1→2: no edge
        assert!(demand.get());

        b.call(); // 2→1: no edge
        a.call(); // 1→0: edge
        assert!(!demand.get());

        assert_eq!(*edges.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn unsubscribe_all_fires_a_single_down_edge() {
        let store = Store::new(0);
        let demand = store.has_subscribers();
        let (edges, cb) = sink();
        let _watch = demand.subscribe_with(cb, SubscribeOpts::default().without_initial_call());

        let _a = store.subscribe(|_| {});
        let _b = store.subscribe(|_| {});
        let _c = store.subscribe(|_| {});
        store.unsubscribe_all();

        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(*edges.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn off_is_idempotent() {
        let store = Store::new(0);
        let _keep = store.subscribe(|_| {});
        let mut off = store.subscribe(|_| {});
        assert_eq!(store.subscriber_count(), 2);

        off.call();
        off.call();
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let store = Store::new(0);
        let _a = store
            .subscribe_with(|_| {}, SubscribeOpts::labelled("widget"))
            .unwrap();
        let err = store
            .subscribe_with(|_| {}, SubscribeOpts::labelled("widget"))
            .unwrap_err();
        assert_eq!(
            err,
            StateError::DuplicateLabel {
                label: "widget".to_string()
            }
        );
    }

    #[test]
    fn subscribe_set_unsubscribe_scenario() {
        let store = Store::new(0);
        let (seen, cb) = sink();

        let mut off = store.subscribe(cb);
        assert_eq!(*seen.lock().unwrap(), vec![0]);

        store.set(5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 5]);

        off.call();
        assert!(!store.has_subscribers().get());
    }

    #[test]
    fn update_applies_the_mutation() {
        let store = Store::new(10);
        store.update(|v| v + 5);
        assert_eq!(store.get(), 15);
    }

    #[test]
    fn map_derives_and_tracks() {
        let store = Store::new(2);
        let doubled = store.map(|v| v * 2);
        assert_eq!(doubled.get(), 4);

        store.set(10);
        assert_eq!(doubled.get(), 20);
    }
}
