//! # Unsubscribe handles and the teardown aggregator.
//!
//! [`Off`] is the idempotent unsubscribe handle returned by
//! [`Store::subscribe`](crate::Store::subscribe). [`Offs`] collects such
//! handles (or arbitrary teardown closures, synchronous or asynchronous)
//! under unique labels and releases them together.
//!
//! ## Rules
//! - Labels are unique per aggregator; a duplicate registration is
//!   [`StateError::DuplicateLabel`]. Omitted labels draw a generated token.
//! - [`Offs::unsubscribe_all`] runs teardowns **sequentially, in
//!   registration order**, awaiting each, so teardown ordering is deterministic.
//! - The aggregator owns the teardown functions, not the subscriptions
//!   themselves.
//!
//! ## Example
//! ```
//! use livecell::{Offs, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Store::new(0);
//! let mut offs = Offs::new();
//!
//! offs.register(store.subscribe(|_| {}));
//! offs.register_as("logger", store.subscribe(|_| {})).unwrap();
//! assert_eq!(offs.len(), 2);
//!
//! offs.unsubscribe_all().await;
//! assert_eq!(store.subscriber_count(), 0);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::StateError;

/// Global counter for generated teardown labels.
static OFF_SEQ: AtomicU64 = AtomicU64::new(0);

/// Idempotent unsubscribe handle.
///
/// [`call`](Off::call) runs the underlying teardown exactly once; further
/// calls are no-ops. Dropping an `Off` without calling it keeps whatever it
/// guards alive.
pub struct Off {
    run: Option<Box<dyn FnOnce() + Send>>,
}

impl Off {
    /// Wraps a teardown closure.
    pub fn new(run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            run: Some(Box::new(run)),
        }
    }

    /// A handle that does nothing; useful as a placeholder.
    pub fn noop() -> Self {
        Self { run: None }
    }

    /// Runs the teardown. Safe to call any number of times.
    pub fn call(&mut self) {
        if let Some(run) = self.run.take() {
            run();
        }
    }

    /// True once the teardown has run (or the handle was created spent).
    pub fn is_spent(&self) -> bool {
        self.run.is_none()
    }
}

impl fmt::Debug for Off {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Off").field("spent", &self.is_spent()).finish()
    }
}

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Ordered `label → teardown` aggregator.
pub struct Offs {
    entries: Vec<(Arc<str>, Teardown)>,
}

impl Default for Offs {
    fn default() -> Self {
        Self::new()
    }
}

impl Offs {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers an [`Off`] under a generated label.
    pub fn register(&mut self, off: Off) {
        let label = next_label();
        self.entries.push((label, wrap_off(off)));
    }

    /// Registers an [`Off`] under an explicit label.
    ///
    /// Returns [`StateError::DuplicateLabel`] when the label is taken.
    pub fn register_as(&mut self, label: impl Into<String>, off: Off) -> Result<(), StateError> {
        self.insert(label.into(), wrap_off(off))
    }

    /// Registers an asynchronous teardown under a generated label.
    pub fn register_async<F, Fut>(&mut self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let label = next_label();
        self.entries.push((label, wrap_async(teardown)));
    }

    /// Registers an asynchronous teardown under an explicit label.
    ///
    /// Returns [`StateError::DuplicateLabel`] when the label is taken.
    pub fn register_async_as<F, Fut>(
        &mut self,
        label: impl Into<String>,
        teardown: F,
    ) -> Result<(), StateError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(label.into(), wrap_async(teardown))
    }

    fn insert(&mut self, label: String, teardown: Teardown) -> Result<(), StateError> {
        if self.entries.iter().any(|(l, _)| l.as_ref() == label) {
            return Err(StateError::DuplicateLabel { label });
        }
        self.entries.push((Arc::from(label.as_str()), teardown));
        Ok(())
    }

    /// Runs every registered teardown sequentially, in registration order,
    /// awaiting each, then leaves the aggregator empty.
    pub async fn unsubscribe_all(&mut self) {
        for (_, teardown) in self.entries.drain(..) {
            teardown().await;
        }
    }

    /// Number of registered teardowns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered labels, in registration order.
    pub fn labels(&self) -> Vec<Arc<str>> {
        self.entries.iter().map(|(l, _)| Arc::clone(l)).collect()
    }
}

fn next_label() -> Arc<str> {
    let id = OFF_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
    Arc::from(format!("off-{id}").as_str())
}

fn wrap_off(mut off: Off) -> Teardown {
    Box::new(move || -> BoxFuture<'static, ()> {
        off.call();
        Box::pin(async {})
    })
}

fn wrap_async<F, Fut>(teardown: F) -> Teardown
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, ()> { Box::pin(teardown()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn teardowns_run_sequentially_in_registration_order() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mut offs = Offs::new();

        let first = Arc::clone(&order);
        offs.register(Off::new(move || first.lock().unwrap().push("first")));

        let second = Arc::clone(&order);
        offs.register_async(move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            second.lock().unwrap().push("second");
        });

        let third = Arc::clone(&order);
        offs.register(Off::new(move || third.lock().unwrap().push("third")));

        offs.unsubscribe_all().await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(offs.is_empty());
    }

    #[tokio::test]
    async fn duplicate_labels_are_rejected() {
        let mut offs = Offs::new();
        offs.register_as("conn", Off::noop()).unwrap();

        let err = offs.register_as("conn", Off::noop()).unwrap_err();
        assert_eq!(
            err,
            StateError::DuplicateLabel {
                label: "conn".to_string()
            }
        );
        assert_eq!(offs.len(), 1);
    }

    #[test]
    fn generated_labels_are_unique() {
        let mut offs = Offs::new();
        offs.register(Off::noop());
        offs.register(Off::noop());
        let labels = offs.labels();
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn off_runs_exactly_once() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let mut off = Off::new(move || *counter.lock().unwrap() += 1);

        assert!(!off.is_spent());
        off.call();
        off.call();
        assert!(off.is_spent());
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
