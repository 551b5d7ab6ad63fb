//! # Bridge: demand-driven handler attachment on an event target.
//!
//! [`Bridge`] is the synchronous member of the resource family. Instead of a
//! network session it manages a handler registration on an [`EventTarget`]
//! capability: the handler is attached when the store gains its first
//! subscriber and detached when the last one leaves. Payloads delivered to
//! the handler are decoded and fanned out through the store like any other
//! resource update.
//!
//! [`EventTarget`] is a narrow interface; write an adapter for each concrete
//! event source (a message hub, a process-internal dispatcher, a GUI event
//! loop). Attachment is identified by the returned [`SourceToken`], so
//! adapters never need handler identity comparison.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use crate::error::StateError;
use crate::offs::Off;
use crate::store::Store;

use super::{json_decoder, Decoder, Update};

/// Identifies one handler attachment on an [`EventTarget`].
pub type SourceToken = u64;

/// Narrow capability interface over an external event source.
///
/// Implementations must not call back into the owning [`Bridge`] from
/// `attach`/`detach`.
pub trait EventTarget: Send + Sync + 'static {
    /// Registers `handler` for `event`; returns a token identifying the
    /// registration.
    fn attach(&self, event: &str, handler: Arc<dyn Fn(String) + Send + Sync>) -> SourceToken;

    /// Releases the registration identified by `token`.
    fn detach(&self, event: &str, token: SourceToken);
}

struct BridgeState {
    event: Option<String>,
    attached: Option<SourceToken>,
    demand: bool,
}

struct BridgeInner<T> {
    store: Store<Update<T>>,
    target: Arc<dyn EventTarget>,
    decode: Decoder<T>,
    state: Mutex<BridgeState>,
    destroyed: AtomicBool,
}

/// Demand-driven event-target bridge.
///
/// Cheap to clone; all clones drive the same attachment.
pub struct Bridge<T> {
    inner: Arc<BridgeInner<T>>,
    demand_off: Arc<Mutex<Off>>,
}

impl<T> Clone for Bridge<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            demand_off: Arc::clone(&self.demand_off),
        }
    }
}

impl<T: DeserializeOwned + Clone + Send + Sync + 'static> Bridge<T> {
    /// Creates a bridge decoding payloads as JSON.
    pub fn new(target: Arc<dyn EventTarget>, event: impl Into<String>) -> Self {
        Self::from_decoder(target, event.into(), json_decoder())
    }
}

impl<T: Clone + Send + Sync + 'static> Bridge<T> {
    /// Creates a bridge with a custom payload decoder.
    pub fn with_decoder(
        target: Arc<dyn EventTarget>,
        event: impl Into<String>,
        decode: impl Fn(&str) -> Update<T> + Send + Sync + 'static,
    ) -> Self {
        Self::from_decoder(target, event.into(), Arc::new(decode) as Decoder<T>)
    }

    fn from_decoder(target: Arc<dyn EventTarget>, event: String, decode: Decoder<T>) -> Self {
        let inner = Arc::new(BridgeInner {
            store: Store::new(Update::Null),
            target,
            decode,
            state: Mutex::new(BridgeState {
                event: Some(event),
                attached: None,
                demand: false,
            }),
            destroyed: AtomicBool::new(false),
        });

        let watcher = Arc::clone(&inner);
        let demand_off = inner.store.has_subscribers().subscribe(move |up: &bool| {
            if *up {
                BridgeInner::on_demand_up(&watcher);
            } else {
                BridgeInner::on_demand_down(&watcher);
            }
        });

        Self {
            inner,
            demand_off: Arc::new(Mutex::new(demand_off)),
        }
    }

    /// The bridge's value store.
    pub fn store(&self) -> Store<Update<T>> {
        self.inner.store.clone()
    }

    /// Current value. No side effects.
    pub fn get(&self) -> Update<T> {
        self.inner.store.get()
    }

    /// Subscribes to the value store.
    ///
    /// The first subscriber attaches the handler (once an event is set);
    /// the last unsubscribe detaches it.
    pub fn subscribe(&self, call: impl Fn(&Update<T>) + Send + Sync + 'static) -> Off {
        self.inner.store.subscribe(call)
    }

    /// True while the handler is attached.
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().unwrap().attached.is_some()
    }

    /// Sets or clears the bridged event name.
    ///
    /// - `None` detaches and clears the value to [`Update::Null`].
    /// - A different event while attached detaches first, then reattaches
    ///   only if subscribers remain.
    pub fn configure(&self, event: Option<impl Into<String>>) -> Result<(), StateError> {
        self.inner.ensure_alive()?;
        self.inner.detach_now();
        let (cleared, demand) = {
            let mut state = self.inner.state.lock().unwrap();
            state.event = event.map(Into::into);
            (state.event.is_none(), state.demand)
        };
        if cleared {
            self.inner.store.set(Update::Null);
        } else if demand {
            BridgeInner::attach_now(&self.inner);
        }
        Ok(())
    }

    /// Detaches, clears the value, releases every subscription, and marks
    /// the bridge permanently unusable. Subsequent operations return
    /// [`StateError::AlreadyDestroyed`].
    pub fn destroy(&self) -> Result<(), StateError> {
        if self.inner.destroyed.swap(true, AtomicOrdering::SeqCst) {
            return Err(StateError::AlreadyDestroyed);
        }
        self.inner.detach_now();
        self.inner.store.set(Update::Null);
        self.demand_off.lock().unwrap().call();
        self.inner.store.unsubscribe_all();
        Ok(())
    }

    /// Idempotent [`destroy`](Bridge::destroy): returns whether this call
    /// performed the teardown.
    pub fn try_destroy(&self) -> bool {
        self.destroy().is_ok()
    }
}

impl<T: Clone + Send + Sync + 'static> BridgeInner<T> {
    fn ensure_alive(&self) -> Result<(), StateError> {
        if self.destroyed.load(AtomicOrdering::SeqCst) {
            Err(StateError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }

    fn on_demand_up(this: &Arc<Self>) {
        this.state.lock().unwrap().demand = true;
        if !this.destroyed.load(AtomicOrdering::SeqCst) {
            Self::attach_now(this);
        }
    }

    fn on_demand_down(this: &Arc<Self>) {
        this.state.lock().unwrap().demand = false;
        this.detach_now();
    }

    fn attach_now(this: &Arc<Self>) {
        let event = {
            let state = this.state.lock().unwrap();
            if state.attached.is_some() {
                return;
            }
            match &state.event {
                Some(event) => event.clone(),
                None => return,
            }
        };

        let sink = Arc::clone(this);
        let handler: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |payload: String| {
            sink.store.set((sink.decode)(&payload));
        });
        let token = this.target.attach(&event, handler);
        this.state.lock().unwrap().attached = Some(token);
    }

    fn detach_now(&self) {
        let detached = {
            let mut state = self.state.lock().unwrap();
            state
                .attached
                .take()
                .and_then(|token| state.event.clone().map(|event| (event, token)))
        };
        if let Some((event, token)) = detached {
            self.target.detach(&event, token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal in-process event hub implementing [`EventTarget`].
    #[derive(Default)]
    struct TestHub {
        handlers: Mutex<HashMap<SourceToken, (String, Arc<dyn Fn(String) + Send + Sync>)>>,
        seq: std::sync::atomic::AtomicU64,
    }

    impl TestHub {
        fn emit(&self, event: &str, payload: &str) {
            let handlers: Vec<Arc<dyn Fn(String) + Send + Sync>> = self
                .handlers
                .lock()
                .unwrap()
                .values()
                .filter(|(e, _)| e == event)
                .map(|(_, h)| Arc::clone(h))
                .collect();
            for handler in handlers {
                handler(payload.to_string());
            }
        }

        fn attached_count(&self) -> usize {
            self.handlers.lock().unwrap().len()
        }
    }

    impl EventTarget for TestHub {
        fn attach(
            &self,
            event: &str,
            handler: Arc<dyn Fn(String) + Send + Sync>,
        ) -> SourceToken {
            let token = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            self.handlers
                .lock()
                .unwrap()
                .insert(token, (event.to_string(), handler));
            token
        }

        fn detach(&self, _event: &str, token: SourceToken) {
            self.handlers.lock().unwrap().remove(&token);
        }
    }

    #[test]
    fn demand_edges_attach_and_detach() {
        let hub = Arc::new(TestHub::default());
        let bridge: Bridge<u32> = Bridge::new(Arc::clone(&hub) as Arc<dyn EventTarget>, "tick");
        assert_eq!(hub.attached_count(), 0);

        let mut off = bridge.subscribe(|_| {});
        assert_eq!(hub.attached_count(), 1);
        assert!(bridge.is_attached());

        let mut off2 = bridge.subscribe(|_| {});
        assert_eq!(hub.attached_count(), 1); // 1→2: no re-attach

        off2.call();
        assert_eq!(hub.attached_count(), 1);
        off.call();
        assert_eq!(hub.attached_count(), 0);
        assert!(!bridge.is_attached());
    }

    #[test]
    fn emitted_payloads_flow_into_the_store() {
        let hub = Arc::new(TestHub::default());
        let bridge: Bridge<u32> = Bridge::new(Arc::clone(&hub) as Arc<dyn EventTarget>, "tick");
        let _off = bridge.subscribe(|_| {});

        hub.emit("tick", "21");
        assert_eq!(bridge.get(), Update::Value(21));

        // Other events are not bridged.
        hub.emit("tock", "99");
        assert_eq!(bridge.get(), Update::Value(21));
    }

    #[test]
    fn decode_failures_are_values() {
        let hub = Arc::new(TestHub::default());
        let bridge: Bridge<u32> = Bridge::new(Arc::clone(&hub) as Arc<dyn EventTarget>, "tick");
        let _off = bridge.subscribe(|_| {});

        hub.emit("tick", "not a number");
        assert_eq!(
            bridge.get().error().map(|e| e.as_label()),
            Some("transport_decode")
        );
    }

    #[test]
    fn reconfigure_moves_the_attachment() {
        let hub = Arc::new(TestHub::default());
        let bridge: Bridge<u32> = Bridge::new(Arc::clone(&hub) as Arc<dyn EventTarget>, "tick");
        let _off = bridge.subscribe(|_| {});

        bridge.configure(Some("tock")).unwrap();
        assert_eq!(hub.attached_count(), 1);

        hub.emit("tick", "1");
        assert_eq!(bridge.get(), Update::Null);
        hub.emit("tock", "2");
        assert_eq!(bridge.get(), Update::Value(2));

        bridge.configure(None::<String>).unwrap();
        assert_eq!(hub.attached_count(), 0);
        assert_eq!(bridge.get(), Update::Null);
    }

    #[test]
    fn destroy_is_terminal() {
        let hub = Arc::new(TestHub::default());
        let bridge: Bridge<u32> = Bridge::new(Arc::clone(&hub) as Arc<dyn EventTarget>, "tick");
        let _off = bridge.subscribe(|_| {});

        bridge.destroy().unwrap();
        assert_eq!(hub.attached_count(), 0);
        assert_eq!(bridge.get(), Update::Null);
        assert_eq!(
            bridge.configure(Some("tock")),
            Err(StateError::AlreadyDestroyed)
        );
        assert_eq!(bridge.destroy(), Err(StateError::AlreadyDestroyed));
        assert!(!bridge.try_destroy());
    }
}
