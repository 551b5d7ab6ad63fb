//! # Observable value cells.
//!
//! This module provides the crate's reactive unit:
//! - [`Store`] — a value cell with ordered synchronous subscriber fan-out
//!   and a nested demand store ([`Store::has_subscribers`])
//! - [`SubscribeOpts`] — labelling and initial-call options for
//!   [`Store::subscribe_with`]
//!
//! ## Quick wiring
//! ```text
//! producer ── set(value) ──► Store ──► fan-out (subscription order, sync)
//!                              │
//!                    subscriber count 0⇄1
//!                              │
//!                              ▼
//!                  has_subscribers: Store<bool>  ──► demand-driven resources
//! ```
//!
//! The demand store is what couples a [`Feed`](crate::Feed) or
//! [`Channel`](crate::Channel) connection to subscriber demand; see
//! `resource/` for the consumers.

mod cell;

pub use cell::{Store, SubscribeOpts};
