//! # Transition: an externally driven, step-sequenced state change.
//!
//! [`Transition`] holds an ordered list of asynchronous steps. It does not
//! drive itself: an external scheduler calls [`step`](Transition::step) once
//! per tick/event and the transition advances one step at a time.
//!
//! ## Lifecycle
//! ```text
//! idle (index 0)
//!   │  step() — runs on_start hooks, then step[0]
//!   ▼
//! running (0 < index < N)
//!   │  step() — runs step[index], advances
//!   ▼
//! last step done — runs on_ended hooks, index wraps to 0 → idle
//!
//! cancel() at any point — runs the cancel hook, index resets to 0,
//!                         remaining steps and end hooks are skipped
//! ```
//!
//! ## Rules
//! - A hook failure aborts the run and propagates wrapped with the hook's
//!   position ([`TransitionError`]).
//! - An empty transition completes immediately.
//! - Overlapping `step` calls are prevented structurally: `step` takes
//!   `&mut self`.
//!
//! ## Example
//! ```
//! use livecell::{StepOutcome, Transition};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut t: Transition<&str> = Transition::new();
//! t.add_step(|_| async {});
//! t.add_step(|_| async {});
//!
//! assert_eq!(t.step(&"tick").await.unwrap(), StepOutcome::InProgress);
//! assert_eq!(t.step(&"tick").await.unwrap(), StepOutcome::Done);
//! assert_eq!(t.current_index(), 0);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::TransitionError;

type Step<P> = Box<dyn FnMut(&P) -> BoxFuture<'static, ()> + Send>;
type Hook<P> = Box<dyn FnMut(&P) -> Result<(), String> + Send>;
type CancelFn<P> = Box<dyn FnMut(&P) + Send>;

/// Result of one [`Transition::step`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// More steps remain; call `step` again on the next tick.
    InProgress,
    /// The run completed; the index wrapped back to 0.
    Done,
}

impl StepOutcome {
    /// True when the run completed.
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

/// Ordered list of asynchronous steps advanced by an external driver.
///
/// `P` is the parameter type handed to every step, hook, and cancel call by
/// the driver. Steps receive `&P` and must produce owned (`'static`)
/// futures; clone what the future needs out of the parameters.
pub struct Transition<P> {
    steps: Vec<Step<P>>,
    index: usize,
    on_start: Vec<Hook<P>>,
    on_ended: Vec<Hook<P>>,
    cancel_fn: Option<CancelFn<P>>,
}

impl<P> Default for Transition<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Transition<P> {
    /// Creates an empty transition.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            index: 0,
            on_start: Vec::new(),
            on_ended: Vec::new(),
            cancel_fn: None,
        }
    }

    /// Creates a transition with a single step that waits `delay`.
    pub fn from_delay(delay: Duration) -> Self {
        let mut t = Self::new();
        t.add_delay(delay);
        t
    }

    /// Creates a transition with a single step.
    pub fn from_step<F, Fut>(step: F) -> Self
    where
        F: FnMut(&P) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut t = Self::new();
        t.add_step(step);
        t
    }

    /// Appends a step.
    pub fn add_step<F, Fut>(&mut self, mut step: F) -> &mut Self
    where
        F: FnMut(&P) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.steps.push(Box::new(
            move |params: &P| -> BoxFuture<'static, ()> { Box::pin(step(params)) },
        ));
        self
    }

    /// Appends a step that waits `delay`.
    pub fn add_delay(&mut self, delay: Duration) -> &mut Self {
        self.add_step(move |_| tokio::time::sleep(delay))
    }

    /// Registers a hook that runs before the first step of every run.
    pub fn on_start<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&P) -> Result<(), String> + Send + 'static,
    {
        self.on_start.push(Box::new(hook));
        self
    }

    /// Registers a hook that runs after the last step of every run.
    pub fn on_ended<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&P) -> Result<(), String> + Send + 'static,
    {
        self.on_ended.push(Box::new(hook));
        self
    }

    /// Registers the cancel hook invoked by [`cancel`](Transition::cancel).
    pub fn with_cancel<F>(&mut self, cancel: F) -> &mut Self
    where
        F: FnMut(&P) + Send + 'static,
    {
        self.cancel_fn = Some(Box::new(cancel));
        self
    }

    /// Runs one step.
    ///
    /// - With no steps registered, returns [`StepOutcome::Done`] immediately.
    /// - At index 0, runs every `on_start` hook (in order) first; a hook
    ///   failure aborts the run before its first step and the index stays 0.
    /// - Runs the step at the current index and advances. When the index
    ///   reaches the step count, runs every `on_ended` hook, resets the
    ///   index to 0 (also on hook failure; the run is over either way), and
    ///   returns [`StepOutcome::Done`].
    pub async fn step(&mut self, params: &P) -> Result<StepOutcome, TransitionError> {
        if self.steps.is_empty() {
            return Ok(StepOutcome::Done);
        }

        if self.index == 0 {
            for (index, hook) in self.on_start.iter_mut().enumerate() {
                hook(params).map_err(|reason| TransitionError::StartHook { index, reason })?;
            }
        }

        (self.steps[self.index])(params).await;
        self.index += 1;

        if self.index == self.steps.len() {
            let mut failure = None;
            for (index, hook) in self.on_ended.iter_mut().enumerate() {
                if let Err(reason) = hook(params) {
                    failure = Some(TransitionError::EndHook { index, reason });
                    break;
                }
            }
            self.index = 0;
            return match failure {
                Some(err) => Err(err),
                None => Ok(StepOutcome::Done),
            };
        }

        Ok(StepOutcome::InProgress)
    }

    /// Cancels the current run: invokes the cancel hook (if registered) with
    /// `params`, then unconditionally resets the index to 0. Remaining steps
    /// and end hooks are skipped.
    pub fn cancel(&mut self, params: &P) {
        if let Some(cancel) = &mut self.cancel_fn {
            cancel(params);
        }
        self.index = 0;
    }

    /// Index of the next step to run (0 = idle or about to start).
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True while no run is in progress.
    pub fn is_idle(&self) -> bool {
        self.index == 0
    }
}
