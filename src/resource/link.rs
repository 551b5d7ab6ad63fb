//! # Link: the shared connection control loop.
//!
//! A [`Link`] couples one transport connection to subscriber demand on its
//! value store. Public handles ([`Feed`](super::Feed),
//! [`Channel`](super::Channel)) talk to a spawned control-loop task over an
//! unbounded command channel; a subscription on the store's
//! `has_subscribers` store forwards demand edges as commands.
//!
//! ## Architecture
//! ```text
//! handle ── Configure/Reconnect/Send/Destroy ──► control loop
//! demand edge (0⇄1) ── DemandUp/DemandDown ────►     │ converge()
//!                                                     ▼
//!                                     session? ──► spawn connect + pump
//!                                                     │
//! pump ── Opened/Sent/Lost {generation} ──────────► control loop
//! retry timer ── RetryElapsed {seq} ──────────────► control loop
//! ```
//!
//! ## Rules
//! - **Invariant**: session open ⇔ (demand ∨ queued sends) ∧ endpoint ∧
//!   not destroyed. The loop re-converges after every command.
//! - **Generations**: every spawned connection gets a fresh generation
//!   number; events from superseded connections are ignored (cooperative
//!   cancellation: late completions simply lose).
//! - **Reconnect**: delays are drawn fresh from the [`ReconnectPolicy`]
//!   window per attempt; a pending retry timer blocks immediate reconnects
//!   and is superseded by any configure/disconnect.
//! - Without auto-reconnect, an unplanned connection loss suspends the link
//!   until the next demand edge, configure, or manual reconnect.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::deferred::{Deferred, Rejection};
use crate::error::{StateError, TransportError};
use crate::offs::Off;
use crate::store::Store;

use super::connector::{Connect, Frame, Session};
use super::{Decoder, Update};

/// Reconnect delay window; the delay is drawn uniformly from `[min, max]`
/// on every attempt.
///
/// A fresh draw per attempt (rather than exponential growth) spreads mass
/// reconnection of many clients across the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Lower bound of the delay window.
    pub min: Duration,
    /// Upper bound of the delay window.
    pub max: Duration,
}

impl ReconnectPolicy {
    /// A fixed delay: `min == max`, no randomization.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// A `[min, max]` window.
    pub fn window(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Draws the next delay.
    pub(crate) fn draw(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Construction options for a [`Link`].
pub(crate) struct LinkOptions<T> {
    pub url: Option<String>,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    pub decode: Decoder<T>,
}

type Outbound = (String, Deferred<()>);

pub(crate) enum Command {
    Configure { url: Option<String> },
    DemandUp,
    DemandDown,
    Reconnect { delay: Duration },
    Send { text: String, done: Deferred<()> },
    Destroy { done: Deferred<()> },
    // Connection events, tagged with the generation they belong to.
    Opened { generation: u64 },
    Sent { generation: u64 },
    Lost { generation: u64 },
    RetryElapsed { seq: u64 },
}

/// Handle side of the control loop, shared by the resource variants.
pub(crate) struct Link<T> {
    store: Store<Update<T>>,
    connected: Store<bool>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    root: CancellationToken,
    destroyed: AtomicBool,
    demand_off: Mutex<Off>,
}

impl<T: Clone + Send + Sync + 'static> Link<T> {
    /// Creates the stores, wires the demand watcher, and spawns the control
    /// loop. Must be called within a tokio runtime.
    pub(crate) fn spawn(
        connector: Arc<dyn Connect>,
        opts: LinkOptions<T>,
        initial: Update<T>,
    ) -> Arc<Self> {
        let store = Store::new(initial);
        let connected = Store::new(false);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();

        let demand_tx = cmd_tx.clone();
        let demand_off = store.has_subscribers().subscribe(move |up: &bool| {
            let _ = demand_tx.send(if *up {
                Command::DemandUp
            } else {
                Command::DemandDown
            });
        });

        let state = LinkLoop {
            store: store.clone(),
            connected: connected.clone(),
            connector,
            url: opts.url,
            auto_reconnect: opts.auto_reconnect,
            reconnect: opts.reconnect,
            decode: opts.decode,
            cmd_tx: cmd_tx.clone(),
            root: root.clone(),
            demand: false,
            suspended: false,
            generation: 0,
            session: None,
            retry: None,
            retry_seq: 0,
            pending: Vec::new(),
            inflight: 0,
        };
        tokio::spawn(state.run(cmd_rx));

        Arc::new(Self {
            store,
            connected,
            cmd_tx,
            root,
            destroyed: AtomicBool::new(false),
            demand_off: Mutex::new(demand_off),
        })
    }

    pub(crate) fn store(&self) -> Store<Update<T>> {
        self.store.clone()
    }

    pub(crate) fn connected_store(&self) -> Store<bool> {
        self.connected.clone()
    }

    pub(crate) fn ensure_alive(&self) -> Result<(), StateError> {
        if self.destroyed.load(AtomicOrdering::SeqCst) {
            Err(StateError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }

    /// Sets or clears the endpoint. See the variant docs for the full
    /// configure contract.
    pub(crate) fn configure(&self, url: Option<String>) -> Result<(), StateError> {
        self.ensure_alive()?;
        let _ = self.cmd_tx.send(Command::Configure { url });
        Ok(())
    }

    /// Disconnects immediately and schedules a connect after `delay`
    /// (honored only while the connection invariant holds at that point).
    pub(crate) fn reconnect(&self, delay: Duration) -> Result<(), StateError> {
        self.ensure_alive()?;
        let _ = self.cmd_tx.send(Command::Reconnect { delay });
        Ok(())
    }

    /// Queues one outbound payload. The returned deferred settles when the
    /// payload is transmitted (or rejected on loss/teardown).
    pub(crate) fn send(&self, text: String) -> Result<Deferred<()>, StateError> {
        self.ensure_alive()?;
        let done = Deferred::new();
        let queued = self.cmd_tx.send(Command::Send {
            text,
            done: done.clone(),
        });
        if queued.is_err() {
            done.try_reject(Rejection::cancelled("destroyed"));
        }
        Ok(done)
    }

    /// Disconnects, sets the store to [`Update::Null`], releases every
    /// internal subscription, and marks the link permanently unusable.
    pub(crate) async fn destroy(&self) -> Result<(), StateError> {
        if self.destroyed.swap(true, AtomicOrdering::SeqCst) {
            return Err(StateError::AlreadyDestroyed);
        }
        let done = Deferred::new();
        let sent = self.cmd_tx.send(Command::Destroy { done: done.clone() });
        if sent.is_ok() {
            let _ = done.wait().await;
        }
        self.demand_off.lock().unwrap().call();
        self.store.unsubscribe_all();
        self.root.cancel();
        Ok(())
    }

    /// Idempotent [`destroy`](Link::destroy): returns whether this call
    /// performed the teardown.
    pub(crate) async fn try_destroy(&self) -> bool {
        self.destroy().await.is_ok()
    }

    /// Child token scoped to this link's lifetime (cancelled on destroy).
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }
}

struct Active {
    generation: u64,
    token: CancellationToken,
    out_tx: mpsc::UnboundedSender<Outbound>,
}

struct LinkLoop<T> {
    store: Store<Update<T>>,
    connected: Store<bool>,
    connector: Arc<dyn Connect>,
    url: Option<String>,
    auto_reconnect: bool,
    reconnect: ReconnectPolicy,
    decode: Decoder<T>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    root: CancellationToken,

    demand: bool,
    /// Set after an unplanned loss without auto-reconnect; blocks converge
    /// until the next demand edge, configure, or manual reconnect.
    suspended: bool,
    generation: u64,
    session: Option<Active>,
    retry: Option<(u64, CancellationToken)>,
    retry_seq: u64,
    pending: Vec<Outbound>,
    inflight: usize,
}

impl<T: Clone + Send + Sync + 'static> LinkLoop<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Configure { url } => self.on_configure(url),
                Command::DemandUp => {
                    self.demand = true;
                    self.suspended = false;
                    self.converge();
                }
                Command::DemandDown => {
                    self.demand = false;
                    self.suspended = false;
                    self.converge();
                }
                Command::Reconnect { delay } => {
                    self.suspended = false;
                    self.drop_session();
                    self.schedule_retry(delay);
                }
                Command::Send { text, done } => self.on_send(text, done),
                Command::Opened { generation } => self.on_opened(generation),
                Command::Sent { generation } => {
                    if self.session_generation() == Some(generation) && self.inflight > 0 {
                        self.inflight -= 1;
                        self.converge();
                    }
                }
                Command::Lost { generation } => self.on_lost(generation),
                Command::RetryElapsed { seq } => {
                    if self.retry.as_ref().map(|(s, _)| *s) == Some(seq) {
                        self.retry = None;
                        self.converge();
                    }
                }
                Command::Destroy { done } => {
                    self.shutdown();
                    // Settle anything still queued behind the destroy.
                    rx.close();
                    while let Ok(cmd) = rx.try_recv() {
                        if let Command::Send { done, .. } = cmd {
                            done.try_reject(Rejection::cancelled("destroyed"));
                        }
                    }
                    let _ = done.try_resolve(());
                    return;
                }
            }
        }
        // Every handle dropped without an explicit destroy.
        self.shutdown();
    }

    fn session_generation(&self) -> Option<u64> {
        self.session.as_ref().map(|a| a.generation)
    }

    /// The connection invariant; queued or in-flight sends count as demand.
    fn should_connect(&self) -> bool {
        (self.demand || !self.pending.is_empty() || self.inflight > 0) && self.url.is_some()
    }

    fn converge(&mut self) {
        if self.should_connect() {
            if self.session.is_none() && self.retry.is_none() && !self.suspended {
                self.spawn_connection();
            }
        } else {
            self.cancel_retry();
            self.drop_session();
        }
    }

    fn on_configure(&mut self, url: Option<String>) {
        self.suspended = false;
        self.cancel_retry();
        if self.url != url {
            self.drop_session();
        }
        self.url = url;
        if self.url.is_none() {
            self.store.set(Update::Null);
            for (_, done) in self.pending.drain(..) {
                done.try_reject(Rejection::error("no endpoint configured"));
            }
        }
        self.converge();
    }

    fn on_send(&mut self, text: String, done: Deferred<()>) {
        if self.url.is_none() {
            done.try_reject(Rejection::error("no endpoint configured"));
            return;
        }
        match &self.session {
            Some(active) => {
                if let Err(failed) = active.out_tx.send((text, done)) {
                    self.pending.push(failed.0);
                } else {
                    self.inflight += 1;
                }
            }
            None => {
                self.pending.push((text, done));
                self.converge();
            }
        }
    }

    fn on_opened(&mut self, generation: u64) {
        let out_tx = match &self.session {
            Some(active) if active.generation == generation => active.out_tx.clone(),
            _ => return,
        };
        self.connected.set(true);
        for out in self.pending.drain(..).collect::<Vec<_>>() {
            if let Err(failed) = out_tx.send(out) {
                let (_, done) = failed.0;
                done.try_reject(Rejection::cancelled("connection lost"));
            } else {
                self.inflight += 1;
            }
        }
    }

    fn on_lost(&mut self, generation: u64) {
        if self.session_generation() != Some(generation) {
            return;
        }
        self.session = None;
        self.inflight = 0;
        self.connected.set(false);

        if self.auto_reconnect && self.should_connect() {
            let delay = self.reconnect.draw();
            if let Some(url) = &self.url {
                log::debug!("connection to {url} lost, reconnecting in {delay:?}");
            }
            self.schedule_retry(delay);
        } else {
            self.suspended = true;
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        self.retry_seq += 1;
        let seq = self.retry_seq;
        let token = self.root.child_token();
        self.retry = Some((seq, token.clone()));

        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::RetryElapsed { seq });
                }
            }
        });
    }

    fn cancel_retry(&mut self) {
        if let Some((_, token)) = self.retry.take() {
            token.cancel();
        }
    }

    fn drop_session(&mut self) {
        if let Some(active) = self.session.take() {
            active.token.cancel();
            self.connected.set(false);
        }
        self.inflight = 0;
    }

    fn spawn_connection(&mut self) {
        let Some(url) = self.url.clone() else { return };
        self.generation += 1;
        let generation = self.generation;
        let token = self.root.child_token();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.session = Some(Active {
            generation,
            token: token.clone(),
            out_tx,
        });

        let connector = Arc::clone(&self.connector);
        let store = self.store.clone();
        let decode = Arc::clone(&self.decode);
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = token.cancelled() => return,
                result = connector.open(&url) => result,
            };
            match opened {
                Ok(session) => {
                    let _ = tx.send(Command::Opened { generation });
                    pump(session, out_rx, token, generation, url, store, decode, tx).await;
                }
                Err(error) => {
                    store.set(Update::Error(error));
                    let _ = tx.send(Command::Lost { generation });
                }
            }
        });
    }

    fn shutdown(&mut self) {
        self.cancel_retry();
        self.drop_session();
        for (_, done) in self.pending.drain(..) {
            done.try_reject(Rejection::cancelled("destroyed"));
        }
        self.store.set(Update::Null);
        self.root.cancel();
    }
}

/// Drives one open session: decodes inbound frames into the store, writes
/// queued outbound payloads, reports loss to the control loop.
#[allow(clippy::too_many_arguments)]
async fn pump<T: Clone + Send + Sync + 'static>(
    mut session: Box<dyn Session>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    token: CancellationToken,
    generation: u64,
    url: String,
    store: Store<Update<T>>,
    decode: Decoder<T>,
    tx: mpsc::UnboundedSender<Command>,
) {
    enum PumpEvent {
        Cancelled,
        Inbound(Option<Frame>),
        Outbound(Option<Outbound>),
    }

    let lost = loop {
        let event = tokio::select! {
            _ = token.cancelled() => PumpEvent::Cancelled,
            frame = session.recv() => PumpEvent::Inbound(frame),
            outbound = out_rx.recv() => PumpEvent::Outbound(outbound),
        };
        match event {
            PumpEvent::Cancelled => break false,
            PumpEvent::Inbound(Some(Frame::Message(text))) => store.set(decode(&text)),
            PumpEvent::Inbound(Some(Frame::Error(reason))) => {
                store.set(Update::Error(TransportError::Stream {
                    url: url.clone(),
                    reason,
                }));
                break true;
            }
            PumpEvent::Inbound(None) => {
                store.set(Update::Error(TransportError::Closed { url: url.clone() }));
                break true;
            }
            PumpEvent::Outbound(Some((text, done))) => match session.send(text).await {
                Ok(()) => {
                    done.try_resolve(());
                    let _ = tx.send(Command::Sent { generation });
                }
                Err(error) => {
                    done.try_reject(Rejection::error(error.to_string()));
                    store.set(Update::Error(error));
                    break true;
                }
            },
            // The control loop abandoned this session; its token cancel
            // lands momentarily.
            PumpEvent::Outbound(None) => break false,
        }
    };

    // Settle whatever was queued but never transmitted.
    out_rx.close();
    while let Ok((_, done)) = out_rx.try_recv() {
        done.try_reject(Rejection::cancelled("connection lost"));
    }

    if lost {
        let _ = tx.send(Command::Lost { generation });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_stays_within_the_window() {
        let policy = ReconnectPolicy::window(
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        for _ in 0..200 {
            let delay = policy.draw();
            assert!(delay >= Duration::from_millis(100), "delay {delay:?} below window");
            assert!(delay <= Duration::from_millis(500), "delay {delay:?} above window");
        }
    }

    #[test]
    fn reconnect_draws_vary_across_attempts() {
        let policy = ReconnectPolicy::window(Duration::ZERO, Duration::from_secs(60));
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..100 {
            distinct.insert(policy.draw());
        }
        assert!(distinct.len() > 1, "window draws never varied");
    }

    #[test]
    fn fixed_policy_never_randomizes() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(3));
        for _ in 0..20 {
            assert_eq!(policy.draw(), Duration::from_secs(3));
        }
    }
}
