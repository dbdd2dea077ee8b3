//! Notification bus fanning out connection data to many subscribers.
//!
//! The bus keeps only weak references to object subscribers, so an observer
//! lives exactly as long as its real owner. Registrations whose target has been
//! dropped are skipped and pruned on the next access.
//!
//! ```text
//!   transport ──► NotificationBus::notify(data)
//!                         │  snapshot registry (lock released)
//!                         ▼
//!            Weak<O>.upgrade() ── dead ──► prune
//!                         │
//!                         ▼
//!            subscriber(data) ── Err / panic ──► logged, delivery continues
//!                         │
//!                         ▼
//!            notify() from a callback ──► queued, delivered next
//! ```

use std::borrow::Borrow;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use log::{error, trace, warn};
use parking_lot::{Mutex, ReentrantMutex};

/// Return type of every subscriber callback.
pub type SubscriberResult = anyhow::Result<()>;

/// Object that can be subscribed as a single-call capability.
pub trait OnData<T: ?Sized>: Send + Sync {
    fn on_data(&self, data: &T) -> SubscriberResult;
}

/// Identity of a subscription.
///
/// Two subscriptions are the same subscriber when they share the tag and the
/// addresses: the function, the object and method pair, or the callable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberKey {
    Function(usize),
    Method { object: usize, method: usize },
    Callable(usize),
}

impl SubscriberKey {
    /// Key of a callable subscriber, computed from a reference to the object.
    ///
    /// Lets an [`OnData`] implementation unsubscribe itself from inside
    /// `on_data`.
    pub fn callable_of<O>(object: &O) -> Self {
        SubscriberKey::Callable(object as *const O as *const () as usize)
    }
}

type Invoker<T> = Box<dyn Fn(&T) -> Option<SubscriberResult> + Send + Sync>;
type Liveness = Box<dyn Fn() -> bool + Send + Sync>;

/// A subscriber ready to be registered on a [`NotificationBus`].
pub struct Subscriber<T: ?Sized> {
    key: SubscriberKey,
    alive: Liveness,
    /// Returns `None` when the backing object no longer exists.
    invoke: Invoker<T>,
}

impl<T: ?Sized + 'static> Subscriber<T> {
    /// A free function.
    pub fn function(function: fn(&T) -> SubscriberResult) -> Self {
        Self {
            key: SubscriberKey::Function(function as usize),
            alive: Box::new(|| true),
            invoke: Box::new(move |data| Some(function(data))),
        }
    }

    /// A method bound to an object held weakly.
    pub fn method<O>(target: &Arc<O>, method: fn(&O, &T) -> SubscriberResult) -> Self
    where
        O: Send + Sync + 'static,
    {
        let weak = Arc::downgrade(target);
        let probe = weak.clone();
        Self {
            key: SubscriberKey::Method {
                object: Arc::as_ptr(target) as *const () as usize,
                method: method as usize,
            },
            alive: Box::new(move || probe.strong_count() > 0),
            invoke: Box::new(move |data| weak.upgrade().map(|object| method(&object, data))),
        }
    }

    /// An object implementing [`OnData`], held weakly.
    pub fn callable<O>(target: &Arc<O>) -> Self
    where
        O: OnData<T> + 'static,
    {
        Self::callable_weak(Arc::downgrade(target))
    }

    /// An object implementing [`OnData`] from an existing weak handle.
    pub fn callable_weak<O>(target: Weak<O>) -> Self
    where
        O: OnData<T> + 'static,
    {
        let probe = target.clone();
        Self {
            key: SubscriberKey::Callable(Weak::as_ptr(&target) as *const () as usize),
            alive: Box::new(move || probe.strong_count() > 0),
            invoke: Box::new(move |data| target.upgrade().map(|object| object.on_data(data))),
        }
    }
}

impl<T: ?Sized> Subscriber<T> {
    pub fn key(&self) -> SubscriberKey {
        self.key
    }

    fn is_alive(&self) -> bool {
        (self.alive)()
    }
}

impl<T: ?Sized> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("key", &self.key).finish()
    }
}

/// Publisher delivering data synchronously, in subscription order, to every
/// live subscriber.
///
/// Registry mutations are serialized by an internal lock that is never held
/// while subscriber code runs, so subscribers may subscribe or unsubscribe
/// (themselves or others) from inside their callback.
///
/// Deliveries on one bus never overlap. A chunk reaches every live subscriber
/// before the next one is delivered: data notified from inside a callback,
/// such as a loopback transport answering a write, is queued and delivered
/// by the outermost `notify` once the current chunk is done.
pub struct NotificationBus<T: ?Sized + ToOwned> {
    name: String,
    registry: Mutex<Vec<Arc<Subscriber<T>>>>,
    /// `true` while the owning thread is delivering.
    delivery: ReentrantMutex<Cell<bool>>,
    pending: Mutex<VecDeque<T::Owned>>,
}

impl<T: ?Sized + ToOwned + 'static> NotificationBus<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(Cell::new(false)),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a subscriber; subscribing the same subscriber again is a no-op.
    ///
    /// Returns `true` when a new registration was added.
    pub fn subscribe(&self, subscriber: Subscriber<T>) -> bool {
        let mut registry = self.registry.lock();
        // A dropped object's address may be reused, prune before comparing keys.
        registry.retain(|s| s.is_alive());
        if registry.iter().any(|s| s.key == subscriber.key) {
            trace!("{}: {:?} already subscribed", self.name, subscriber.key);
            return false;
        }
        trace!("{}: subscribe {:?}", self.name, subscriber.key);
        registry.push(Arc::new(subscriber));
        true
    }

    /// Removes a registration.
    ///
    /// Removing an absent subscriber only logs a warning, concurrent
    /// unsubscribe races must not break the caller.
    pub fn unsubscribe(&self, subscriber: &Subscriber<T>) -> bool {
        self.unsubscribe_key(subscriber.key)
    }

    /// Removes the registration identified by `key`.
    pub fn unsubscribe_key(&self, key: SubscriberKey) -> bool {
        let mut registry = self.registry.lock();
        match registry.iter().position(|s| s.key == key) {
            Some(pos) => {
                registry.remove(pos);
                trace!("{}: unsubscribe {:?}", self.name, key);
                true
            }
            None => {
                warn!("{}: no such subscription {:?}", self.name, key);
                false
            }
        }
    }

    pub fn is_subscribed(&self, key: SubscriberKey) -> bool {
        self.registry.lock().iter().any(|s| s.key == key && s.is_alive())
    }

    /// Number of registrations whose target is still alive.
    pub fn len(&self) -> usize {
        self.registry.lock().iter().filter(|s| s.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `data` to every currently registered, live subscriber.
    ///
    /// A subscriber returning an error or panicking is logged and stays
    /// registered; delivery continues with the next subscriber.
    pub fn notify(&self, data: &T) {
        let delivering = self.delivery.lock();
        if delivering.get() {
            trace!("{}: queue nested notification", self.name);
            self.pending.lock().push_back(data.to_owned());
            return;
        }

        delivering.set(true);
        self.deliver(data);
        loop {
            let Some(next) = self.pending.lock().pop_front() else {
                break;
            };
            self.deliver(<T::Owned as Borrow<T>>::borrow(&next));
        }
        delivering.set(false);
    }

    fn deliver(&self, data: &T) {
        let snapshot = self.registry.lock().clone();
        for subscriber in snapshot {
            if !self.still_registered(&subscriber) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| (subscriber.invoke)(data))) {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(err))) => {
                    warn!(
                        "{}: subscriber {:?} failed: {:#}",
                        self.name, subscriber.key, err
                    );
                }
                Ok(None) => {
                    trace!("{}: prune dead subscriber {:?}", self.name, subscriber.key);
                    self.registry
                        .lock()
                        .retain(|s| !Arc::ptr_eq(s, &subscriber));
                }
                Err(payload) => {
                    error!(
                        "{}: subscriber {:?} panicked: {}",
                        self.name,
                        subscriber.key,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }

    fn still_registered(&self, subscriber: &Arc<Subscriber<T>>) -> bool {
        self.registry
            .lock()
            .iter()
            .any(|s| Arc::ptr_eq(s, subscriber))
    }
}

impl<T: ?Sized + ToOwned> fmt::Debug for NotificationBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("name", &self.name)
            .field("subscribers", &self.registry.lock().len())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        received: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn on_new_data(&self, data: &str) -> SubscriberResult {
            self.received.lock().expect("lock").push(data.to_string());
            Ok(())
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().expect("lock").clone()
        }
    }

    impl OnData<str> for Recorder {
        fn on_data(&self, data: &str) -> SubscriberResult {
            self.on_new_data(data)
        }
    }

    /// Unsubscribes itself on the first notification.
    struct OneTime {
        bus: Arc<NotificationBus<str>>,
        received: StdMutex<Vec<String>>,
    }

    impl OnData<str> for OneTime {
        fn on_data(&self, data: &str) -> SubscriberResult {
            self.received.lock().expect("lock").push(data.to_string());
            self.bus.unsubscribe_key(SubscriberKey::callable_of(self));
            Ok(())
        }
    }

    static FUNCTION_RECEIVED: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn raw_fun1(data: &str) -> SubscriberResult {
        FUNCTION_RECEIVED
            .lock()
            .expect("lock")
            .push(format!("fun1:{data}"));
        Ok(())
    }

    fn raw_fun2(data: &str) -> SubscriberResult {
        FUNCTION_RECEIVED
            .lock()
            .expect("lock")
            .push(format!("fun2:{data}"));
        Ok(())
    }

    fn failing_observer(_data: &str) -> SubscriberResult {
        Err(anyhow::anyhow!("fail inside observer"))
    }

    fn panicking_observer(_data: &str) -> SubscriberResult {
        panic!("panic inside observer")
    }

    #[test]
    fn same_subscriber_is_not_subscribed_twice() {
        let bus = NotificationBus::<str>::new("test");
        let observer = Arc::new(Recorder::default());

        assert!(bus.subscribe(Subscriber::method(&observer, Recorder::on_new_data)));
        assert!(!bus.subscribe(Subscriber::method(&observer, Recorder::on_new_data)));

        bus.notify("incoming data");
        assert_eq!(observer.received(), vec!["incoming data".to_string()]);
    }

    #[test]
    fn only_subscribed_ones_are_notified() {
        let bus = NotificationBus::<str>::new("test");
        let observer1 = Arc::new(Recorder::default());
        let observer2 = Arc::new(Recorder::default());
        let observer3 = Arc::new(Recorder::default());

        bus.subscribe(Subscriber::method(&observer1, Recorder::on_new_data));
        bus.subscribe(Subscriber::callable(&observer2));

        bus.notify("incoming data");

        assert_eq!(observer1.received(), vec!["incoming data".to_string()]);
        assert_eq!(observer2.received(), vec!["incoming data".to_string()]);
        assert!(observer3.received().is_empty());
    }

    #[test]
    fn notified_subscriber_may_stop_subscription() {
        let bus = Arc::new(NotificationBus::<str>::new("test"));
        let one_time = Arc::new(OneTime {
            bus: bus.clone(),
            received: StdMutex::new(Vec::new()),
        });
        let sibling = Arc::new(Recorder::default());
        bus.subscribe(Subscriber::callable(&one_time));
        bus.subscribe(Subscriber::callable(&sibling));

        bus.notify("data 1");
        bus.notify("data 2");

        assert_eq!(
            *one_time.received.lock().expect("lock"),
            vec!["data 1".to_string()]
        );
        assert_eq!(
            sibling.received(),
            vec!["data 1".to_string(), "data 2".to_string()]
        );
    }

    /// Answers `ping` with a `pong` published on the same bus.
    struct Responder {
        bus: Arc<NotificationBus<str>>,
    }

    impl OnData<str> for Responder {
        fn on_data(&self, data: &str) -> SubscriberResult {
            if data == "ping" {
                self.bus.notify("pong");
            }
            Ok(())
        }
    }

    #[test]
    fn nested_notification_is_delivered_after_current_chunk() {
        let bus = Arc::new(NotificationBus::<str>::new("loopback"));
        let responder = Arc::new(Responder { bus: bus.clone() });
        let first = Arc::new(Recorder::default());
        let last = Arc::new(Recorder::default());
        bus.subscribe(Subscriber::callable(&first));
        bus.subscribe(Subscriber::callable(&responder));
        bus.subscribe(Subscriber::callable(&last));

        bus.notify("ping");

        let expected = vec!["ping".to_string(), "pong".to_string()];
        assert_eq!(first.received(), expected);
        assert_eq!(last.received(), expected);

        bus.notify("other");
        assert_eq!(last.received().len(), 3);
    }

    #[test]
    fn failing_subscriber_does_not_break_others() {
        let bus = NotificationBus::<str>::new("test");
        let observer = Arc::new(Recorder::default());

        bus.subscribe(Subscriber::function(failing_observer));
        bus.subscribe(Subscriber::function(panicking_observer));
        bus.subscribe(Subscriber::callable(&observer));

        bus.notify("data 1");
        bus.notify("data 2");

        assert_eq!(
            observer.received(),
            vec!["data 1".to_string(), "data 2".to_string()]
        );
        // A failure does not deregister the faulting subscriber.
        assert!(bus.is_subscribed(Subscriber::function(failing_observer).key()));
        assert_eq!(bus.len(), 3);
    }

    #[test]
    fn repeated_unsubscription_does_nothing() {
        let bus = NotificationBus::<str>::new("test");
        let observer = Arc::new(Recorder::default());
        let other = Arc::new(Recorder::default());
        let subscriber = Subscriber::callable(&observer);
        bus.subscribe(Subscriber::callable(&observer));
        bus.subscribe(Subscriber::callable(&other));

        assert!(bus.unsubscribe(&subscriber));
        assert!(!bus.unsubscribe(&subscriber));

        bus.notify("data");
        assert!(observer.received().is_empty());
        assert_eq!(other.received(), vec!["data".to_string()]);
    }

    #[test]
    fn single_unsubscription_does_not_impact_other_subscribers() {
        let bus = NotificationBus::<str>::new("mixed");
        let observer1 = Arc::new(Recorder::default());
        let observer2 = Arc::new(Recorder::default());
        let callable1 = Arc::new(Recorder::default());
        let callable2 = Arc::new(Recorder::default());

        bus.subscribe(Subscriber::method(&observer1, Recorder::on_new_data));
        bus.subscribe(Subscriber::method(&observer2, Recorder::on_new_data));
        bus.subscribe(Subscriber::method(&observer2, Recorder::on_new_data));
        bus.unsubscribe(&Subscriber::method(&observer1, Recorder::on_new_data));
        bus.unsubscribe(&Subscriber::method(&observer1, Recorder::on_new_data));

        bus.subscribe(Subscriber::function(raw_fun1));
        bus.subscribe(Subscriber::function(raw_fun2));
        bus.subscribe(Subscriber::function(raw_fun2));
        bus.unsubscribe(&Subscriber::function(raw_fun1));

        bus.subscribe(Subscriber::callable(&callable1));
        bus.subscribe(Subscriber::callable(&callable2));
        bus.subscribe(Subscriber::callable(&callable2));
        bus.unsubscribe(&Subscriber::callable(&callable1));

        bus.notify("incoming data");

        assert!(observer1.received().is_empty());
        assert_eq!(observer2.received(), vec!["incoming data".to_string()]);
        assert_eq!(
            *FUNCTION_RECEIVED.lock().expect("lock"),
            vec!["fun2:incoming data".to_string()]
        );
        assert!(callable1.received().is_empty());
        assert_eq!(callable2.received(), vec!["incoming data".to_string()]);
    }

    #[test]
    fn subscription_does_not_keep_subscriber_alive() {
        let bus = NotificationBus::<str>::new("test");
        let observer = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&observer);
        bus.subscribe(Subscriber::callable(&observer));

        drop(observer);

        assert!(weak.upgrade().is_none());
        assert!(bus.is_empty());
    }

    #[test]
    fn dropped_subscriber_is_not_notified_and_is_pruned() {
        let bus = NotificationBus::<str>::new("test");
        let observer1 = Arc::new(Recorder::default());
        let observer2 = Arc::new(Recorder::default());
        let key1 = SubscriberKey::callable_of(observer1.as_ref());
        bus.subscribe(Subscriber::callable(&observer1));
        bus.subscribe(Subscriber::method(&observer2, Recorder::on_new_data));

        drop(observer1);
        bus.notify("data");

        assert_eq!(observer2.received(), vec!["data".to_string()]);
        assert!(!bus.is_subscribed(key1));
        assert_eq!(bus.registry.lock().len(), 1);
    }
}
