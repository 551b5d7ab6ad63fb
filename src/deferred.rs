//! # Deferred: an externally settleable completion value.
//!
//! [`Deferred`] is the crate's cancellable, timeout-capable completion
//! primitive. Unlike a plain future, settlement is driven from the outside:
//! any holder of a clone may [`resolve`](Deferred::resolve),
//! [`reject`](Deferred::reject), [`cancel`](Deferred::cancel), or arm a
//! single-shot [`set_timeout`](Deferred::set_timeout) timer, while any number
//! of consumers await the outcome through [`wait`](Deferred::wait).
//!
//! ## Settlement rules
//! - Settlement happens **at most once**: `pending → resolved` or
//!   `pending → rejected`, never back.
//! - A second settlement attempt is a programming error and returns
//!   [`StateError::AlreadySettled`]; the `try_*` variants no-op instead and
//!   report whether they won the settlement race.
//! - Settling clears any armed timeout timer.
//!
//! ## Cancellation semantics
//! Cancellation is cooperative: it forces the logical outcome (a rejection
//! tagged `cancelled`) but does not abort in-flight external work. Whatever
//! was racing toward settlement simply loses: its eventual `try_*` call
//! finds the deferred already settled and is ignored.
//!
//! ## Example
//! ```
//! use livecell::Deferred;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let d: Deferred<u32> = Deferred::new();
//! let waiter = d.clone();
//!
//! tokio::spawn(async move {
//!     let _ = waiter.try_resolve(7);
//! });
//!
//! assert_eq!(d.wait().await, Ok(7));
//! assert!(d.is_resolved());
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::StateError;

/// The failure outcome of a [`Deferred`].
///
/// Carries a message plus two flags describing *why* the rejection happened:
/// - `cancelled`: the deferred was cancelled (explicitly or by timeout);
/// - `timed_out`: the armed timeout fired (implies `cancelled`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Human-readable failure message.
    pub message: Arc<str>,
    /// Set on explicit cancellation and on timeout.
    pub cancelled: bool,
    /// Set only when the armed timeout fired.
    pub timed_out: bool,
}

impl Rejection {
    /// A plain failure: neither cancelled nor timed out.
    pub fn error(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
            timed_out: false,
        }
    }

    /// A cancellation outcome (`cancelled = true`).
    pub fn cancelled(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            cancelled: true,
            timed_out: false,
        }
    }

    /// A timeout outcome (`cancelled = true`, `timed_out = true`).
    pub fn timed_out(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            cancelled: true,
            timed_out: true,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Rejection {}

enum State<T> {
    Pending {
        /// Token guarding the currently armed timeout task, if any.
        timer: Option<CancellationToken>,
    },
    Resolved(T),
    Rejected(Rejection),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Notify,
}

/// Externally settleable completion value.
///
/// Cheap to clone (internally holds an `Arc`); all clones observe the same
/// settlement. There is exactly one settlement path ([`Inner`]'s state swap),
/// shared by `resolve`, `reject`, `cancel`, and the timeout timer.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock().unwrap() {
            State::Pending { .. } => "pending",
            State::Resolved(_) => "resolved",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Deferred<T> {
    /// Creates a new pending deferred.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending { timer: None }),
                done: Notify::new(),
            }),
        }
    }

    /// Single settlement path: swaps `Pending` for the outcome, clears the
    /// timer, and wakes every waiter.
    fn settle(&self, outcome: State<T>) -> Result<(), StateError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match &mut *state {
                State::Pending { timer } => {
                    if let Some(timer) = timer.take() {
                        timer.cancel();
                    }
                    *state = outcome;
                }
                _ => return Err(StateError::AlreadySettled),
            }
        }
        self.inner.done.notify_waiters();
        Ok(())
    }

    /// Settles to resolved with `value`.
    ///
    /// Clears any armed timeout timer. Returns
    /// [`StateError::AlreadySettled`] if the deferred is not pending.
    pub fn resolve(&self, value: T) -> Result<(), StateError> {
        self.settle(State::Resolved(value))
    }

    /// Non-erroring [`resolve`](Deferred::resolve): returns whether this call
    /// performed the settlement.
    pub fn try_resolve(&self, value: T) -> bool {
        self.resolve(value).is_ok()
    }

    /// Settles to rejected with `rejection`.
    ///
    /// Clears any armed timeout timer. Returns
    /// [`StateError::AlreadySettled`] if the deferred is not pending.
    pub fn reject(&self, rejection: Rejection) -> Result<(), StateError> {
        self.settle(State::Rejected(rejection))
    }

    /// Non-erroring [`reject`](Deferred::reject): returns whether this call
    /// performed the settlement.
    pub fn try_reject(&self, rejection: Rejection) -> bool {
        self.reject(rejection).is_ok()
    }

    /// Rejects with a default cancellation outcome.
    pub fn cancel(&self) -> Result<(), StateError> {
        self.cancel_with("cancelled")
    }

    /// Rejects with a cancellation outcome carrying `message`.
    pub fn cancel_with(&self, message: impl Into<Arc<str>>) -> Result<(), StateError> {
        self.reject(Rejection::cancelled(message))
    }

    /// Non-erroring [`cancel`](Deferred::cancel).
    pub fn try_cancel(&self) -> bool {
        self.cancel().is_ok()
    }

    /// Non-erroring [`cancel_with`](Deferred::cancel_with).
    pub fn try_cancel_with(&self, message: impl Into<Arc<str>>) -> bool {
        self.cancel_with(message).is_ok()
    }

    /// True while no settlement has happened.
    pub fn is_pending(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap(),
            State::Pending { .. }
        )
    }

    /// True once resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.state.lock().unwrap(), State::Resolved(_))
    }

    /// True once rejected (for any reason).
    pub fn is_rejected(&self) -> bool {
        matches!(&*self.inner.state.lock().unwrap(), State::Rejected(_))
    }

    /// True once rejected with `cancelled` set (explicit cancel or timeout).
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap(),
            State::Rejected(r) if r.cancelled
        )
    }

    /// True once rejected by the armed timeout.
    pub fn is_timed_out(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap(),
            State::Rejected(r) if r.timed_out
        )
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Arms a single-shot timeout.
    ///
    /// If the deferred is still pending when `after` elapses, it is rejected
    /// with a [`Rejection`] tagged `timed_out` and `cancelled`. Re-arming
    /// replaces the previously armed timer. Any settlement clears the timer.
    ///
    /// Must be called within a tokio runtime (the timer is a spawned task
    /// guarded by a cancellation token).
    ///
    /// Returns [`StateError::AlreadySettled`] if the deferred is not pending.
    pub fn set_timeout(
        &self,
        after: Duration,
        message: impl Into<Arc<str>>,
    ) -> Result<(), StateError> {
        let token = CancellationToken::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            match &mut *state {
                State::Pending { timer } => {
                    if let Some(previous) = timer.replace(token.clone()) {
                        previous.cancel();
                    }
                }
                _ => return Err(StateError::AlreadySettled),
            }
        }

        let this = self.clone();
        let message = message.into();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    this.try_reject(Rejection::timed_out(message));
                }
            }
        });
        Ok(())
    }
}

impl<T: Clone> Deferred<T> {
    /// Waits for settlement and returns the outcome.
    ///
    /// Any number of waiters may await concurrently; each receives a clone of
    /// the resolved value (or of the rejection).
    pub async fn wait(&self) -> Result<T, Rejection> {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock().unwrap();
                match &*state {
                    State::Resolved(value) => return Ok(value.clone()),
                    State::Rejected(rejection) => return Err(rejection.clone()),
                    State::Pending { .. } => {}
                }
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_settles_once() {
        let d: Deferred<u32> = Deferred::new();
        assert!(d.is_pending());

        d.resolve(1).unwrap();
        assert!(d.is_resolved());
        assert_eq!(d.resolve(2), Err(StateError::AlreadySettled));
        assert_eq!(
            d.reject(Rejection::error("late")),
            Err(StateError::AlreadySettled)
        );
        assert_eq!(d.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn try_variants_report_the_settlement_race() {
        let d: Deferred<u32> = Deferred::new();
        assert!(d.try_resolve(1));
        assert!(!d.try_resolve(2));
        assert!(!d.try_reject(Rejection::error("late")));
        assert!(!d.try_cancel());
    }

    #[tokio::test]
    async fn cancel_tags_the_rejection() {
        let d: Deferred<u32> = Deferred::new();
        d.cancel().unwrap();

        assert!(d.is_rejected());
        assert!(d.is_cancelled());
        assert!(!d.is_timed_out());

        let err = d.wait().await.unwrap_err();
        assert!(err.cancelled);
        assert!(!err.timed_out);
        assert_eq!(err.message.as_ref(), "cancelled");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timeout_rejects_a_pending_deferred() {
        let d: Deferred<u32> = Deferred::new();
        d.set_timeout(Duration::from_millis(100), "request timed out")
            .unwrap();

        let err = d.wait().await.unwrap_err();
        assert!(err.timed_out);
        assert!(err.cancelled);
        assert_eq!(err.message.as_ref(), "request timed out");
        assert!(d.is_timed_out());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn settlement_clears_the_armed_timer() {
        let d: Deferred<u32> = Deferred::new();
        d.set_timeout(Duration::from_millis(50), "too slow").unwrap();
        d.resolve(9).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(d.is_resolved());
        assert_eq!(d.wait().await, Ok(9));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rearming_replaces_the_previous_timer() {
        let d: Deferred<u32> = Deferred::new();
        d.set_timeout(Duration::from_millis(50), "first").unwrap();
        d.set_timeout(Duration::from_secs(10), "second").unwrap();

        // The first deadline passes without effect.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(d.is_pending());

        let err = d.wait().await.unwrap_err();
        assert_eq!(err.message.as_ref(), "second");
    }

    #[tokio::test]
    async fn set_timeout_on_settled_deferred_is_an_error() {
        let d: Deferred<u32> = Deferred::new();
        d.resolve(1).unwrap();
        assert_eq!(
            d.set_timeout(Duration::from_millis(10), "late"),
            Err(StateError::AlreadySettled)
        );
    }

    #[tokio::test]
    async fn many_waiters_observe_one_settlement() {
        let d: Deferred<String> = Deferred::new();
        let a = d.clone();
        let b = d.clone();

        let wa = tokio::spawn(async move { a.wait().await });
        let wb = tokio::spawn(async move { b.wait().await });
        tokio::task::yield_now().await;

        d.resolve("ready".to_string()).unwrap();
        assert_eq!(wa.await.unwrap(), Ok("ready".to_string()));
        assert_eq!(wb.await.unwrap(), Ok("ready".to_string()));
    }
}
