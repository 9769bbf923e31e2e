use super::notification::{Notification, NotificationData, ObjectId, Observable, ObservableRef};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Identity of an observer, derived from its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(usize);

impl ObserverId {
    pub fn of<O>(observer: &Rc<O>) -> Self {
        Self(Rc::as_ptr(observer).cast::<()>() as usize)
    }

    pub fn of_weak<O>(observer: &Weak<O>) -> Self {
        Self(Weak::as_ptr(observer).cast::<()>() as usize)
    }
}

/// Key for hold and disable scopes. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NotificationScope {
    notification: Option<String>,
    observable: Option<ObjectId>,
    observer: Option<ObserverId>,
}

impl NotificationScope {
    /// Scope covering every notification.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn notification(mut self, name: &str) -> Self {
        self.notification = Some(name.to_owned());
        self
    }

    pub fn observable(mut self, observable: &dyn Observable) -> Self {
        self.observable = Some(observable.object_id());
        self
    }

    pub fn observable_id(mut self, id: ObjectId) -> Self {
        self.observable = Some(id);
        self
    }

    pub fn observer(mut self, observer: ObserverId) -> Self {
        self.observer = Some(observer);
        self
    }

    fn key(
        notification: Option<&str>,
        observable: Option<ObjectId>,
        observer: Option<ObserverId>,
    ) -> Self {
        Self {
            notification: notification.map(str::to_owned),
            observable,
            observer,
        }
    }
}

trait ObserverSlot {
    fn observer_id(&self) -> ObserverId;
    fn is_alive(&self) -> bool;
    /// Returns `false` when the observer is gone.
    fn deliver(&self, notification: &Notification) -> bool;
}

struct MethodSlot<O> {
    observer: Weak<O>,
    method: fn(&O, &Notification),
}

impl<O: 'static> ObserverSlot for MethodSlot<O> {
    fn observer_id(&self) -> ObserverId {
        ObserverId::of_weak(&self.observer)
    }

    fn is_alive(&self) -> bool {
        self.observer.strong_count() > 0
    }

    fn deliver(&self, notification: &Notification) -> bool {
        match self.observer.upgrade() {
            Some(observer) => {
                (self.method)(&observer, notification);
                true
            }
            None => false,
        }
    }
}

type RegistryKey = (Option<String>, Option<ObjectId>);

struct Registration {
    observable: Option<ObservableRef>,
    observers: Vec<Rc<dyn ObserverSlot>>,
}

impl Registration {
    fn is_orphaned(&self) -> bool {
        self.observable
            .as_ref()
            .is_some_and(|observable| !observable.is_alive())
    }
}

#[derive(Default)]
struct HoldState {
    count: usize,
    held: Vec<Notification>,
}

/// Per-document notification dispatcher.
///
/// Single-threaded: it lives in an `Rc` owned by the document root and is
/// reached by every object through its parent chain.
#[derive(Default)]
pub struct NotificationCenter {
    registry: RefCell<HashMap<RegistryKey, Registration>>,
    holds: RefCell<HashMap<NotificationScope, HoldState>>,
    disabled: RefCell<HashMap<NotificationScope, usize>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` on `observer` for `notification` posted by
    /// `observable`. `None` for either filter matches anything.
    ///
    /// Registering the same observer twice under one key replaces the first
    /// registration and moves it to the end of the delivery order.
    pub fn subscribe<O: 'static>(
        &self,
        observer: &Rc<O>,
        method: fn(&O, &Notification),
        notification: Option<&str>,
        observable: Option<&ObservableRef>,
    ) {
        self.subscribe_weak(Rc::downgrade(observer), method, notification, observable);
    }

    /// Same as [`subscribe`](Self::subscribe) for an observer that only has a
    /// weak handle to itself.
    pub fn subscribe_weak<O: 'static>(
        &self,
        observer: Weak<O>,
        method: fn(&O, &Notification),
        notification: Option<&str>,
        observable: Option<&ObservableRef>,
    ) {
        let slot: Rc<dyn ObserverSlot> = Rc::new(MethodSlot { observer, method });
        let observer_id = slot.observer_id();
        let key = (
            notification.map(str::to_owned),
            observable.map(ObservableRef::id),
        );

        let mut registry = self.registry.borrow_mut();
        let registration = registry.entry(key).or_insert_with(|| Registration {
            observable: observable.cloned(),
            observers: Vec::new(),
        });
        registration
            .observers
            .retain(|existing| existing.observer_id() != observer_id);
        registration.observers.push(slot);
    }

    /// Removes one registration. Returns `false` when nothing matched.
    pub fn unsubscribe<O>(
        &self,
        observer: &Rc<O>,
        notification: Option<&str>,
        observable: Option<ObjectId>,
    ) -> bool {
        self.unsubscribe_id(ObserverId::of(observer), notification, observable)
    }

    pub fn unsubscribe_id(
        &self,
        observer: ObserverId,
        notification: Option<&str>,
        observable: Option<ObjectId>,
    ) -> bool {
        let key = (notification.map(str::to_owned), observable);
        let mut registry = self.registry.borrow_mut();
        let Some(registration) = registry.get_mut(&key) else {
            return false;
        };
        let before = registration.observers.len();
        registration
            .observers
            .retain(|slot| slot.observer_id() != observer);
        let removed = registration.observers.len() != before;
        if registration.observers.is_empty() {
            registry.remove(&key);
        }
        removed
    }

    /// True when a live registration exists for exactly this key.
    pub fn has_observer(
        &self,
        observer: ObserverId,
        notification: Option<&str>,
        observable: Option<ObjectId>,
    ) -> bool {
        let key = (notification.map(str::to_owned), observable);
        self.registry.borrow().get(&key).is_some_and(|registration| {
            !registration.is_orphaned()
                && registration
                    .observers
                    .iter()
                    .any(|slot| slot.observer_id() == observer && slot.is_alive())
        })
    }

    /// Number of live registrations across all keys.
    pub fn observer_count(&self) -> usize {
        self.registry
            .borrow()
            .values()
            .filter(|registration| !registration.is_orphaned())
            .map(|registration| {
                registration
                    .observers
                    .iter()
                    .filter(|slot| slot.is_alive())
                    .count()
            })
            .sum()
    }

    /// Drops registrations whose observer or observable no longer exists.
    ///
    /// Returns the number of observer registrations removed.
    pub fn collect_garbage(&self) -> usize {
        let mut removed = 0;
        self.registry.borrow_mut().retain(|_, registration| {
            if registration.is_orphaned() {
                removed += registration.observers.len();
                return false;
            }
            let before = registration.observers.len();
            registration.observers.retain(|slot| slot.is_alive());
            removed += before - registration.observers.len();
            !registration.observers.is_empty()
        });
        if removed > 0 {
            debug!("event=observer_prune module=notify status=ok removed={removed}");
        }
        removed
    }

    /// Posts `name` on behalf of `observable` and delivers it synchronously.
    pub fn post(&self, name: &str, observable: &dyn Observable, data: NotificationData) {
        self.dispatch(Notification::new(name, observable.observable_ref(), data));
    }

    /// Delivers an already built notification.
    pub fn dispatch(&self, notification: Notification) {
        let name = notification.name();
        let source = notification.source_id();

        if self.has_suspensions() {
            let scopes = [
                NotificationScope::key(None, None, None),
                NotificationScope::key(Some(name), None, None),
                NotificationScope::key(None, Some(source), None),
                NotificationScope::key(Some(name), Some(source), None),
            ];
            for scope in &scopes {
                if self.is_disabled(scope) || self.try_hold(scope, &notification) {
                    return;
                }
            }
        }

        let mut saw_dead = false;
        for slot in self.snapshot(name, source) {
            if self.has_suspensions() {
                let observer = Some(slot.observer_id());
                let scopes = [
                    NotificationScope::key(None, None, observer),
                    NotificationScope::key(Some(name), None, observer),
                    NotificationScope::key(None, Some(source), observer),
                    NotificationScope::key(Some(name), Some(source), observer),
                ];
                if scopes.iter().any(|scope| self.is_disabled(scope)) {
                    continue;
                }
                if scopes.iter().any(|scope| self.try_hold(scope, &notification)) {
                    continue;
                }
            }
            if !slot.deliver(&notification) {
                saw_dead = true;
            }
        }

        if saw_dead {
            self.collect_garbage();
        }
    }

    /// Starts (or nests) a hold scope. Matching notifications are buffered
    /// until the matching number of releases.
    pub fn hold_notifications(&self, scope: NotificationScope) {
        self.holds.borrow_mut().entry(scope).or_default().count += 1;
    }

    /// Ends one level of a hold scope. The last release re-posts the buffer in
    /// order. Returns `false` when the scope was not held.
    ///
    /// Re-posting goes through normal dispatch, so for an observer-scoped hold
    /// every other matching observer receives the buffered notifications a
    /// second time.
    pub fn release_held_notifications(&self, scope: &NotificationScope) -> bool {
        let released = {
            let mut holds = self.holds.borrow_mut();
            let Some(state) = holds.get_mut(scope) else {
                warn!("event=hold_release module=notify status=not_held scope={scope:?}");
                return false;
            };
            state.count -= 1;
            if state.count > 0 {
                return true;
            }
            holds.remove(scope).map(|state| state.held).unwrap_or_default()
        };

        for notification in released {
            if notification.source_ref().is_alive() {
                self.dispatch(notification);
            }
        }
        true
    }

    pub fn are_notifications_held(&self, scope: &NotificationScope) -> bool {
        self.holds.borrow().contains_key(scope)
    }

    /// Starts (or nests) a disable scope. Matching notifications are dropped.
    pub fn disable_notifications(&self, scope: NotificationScope) {
        *self.disabled.borrow_mut().entry(scope).or_insert(0) += 1;
    }

    /// Ends one level of a disable scope. Returns `false` when the scope was
    /// not disabled.
    pub fn enable_notifications(&self, scope: &NotificationScope) -> bool {
        let mut disabled = self.disabled.borrow_mut();
        let Some(count) = disabled.get_mut(scope) else {
            warn!("event=notify_enable module=notify status=not_disabled scope={scope:?}");
            return false;
        };
        *count -= 1;
        if *count == 0 {
            disabled.remove(scope);
        }
        true
    }

    pub fn are_notifications_disabled(&self, scope: &NotificationScope) -> bool {
        self.is_disabled(scope)
    }

    fn has_suspensions(&self) -> bool {
        !self.holds.borrow().is_empty() || !self.disabled.borrow().is_empty()
    }

    fn is_disabled(&self, scope: &NotificationScope) -> bool {
        self.disabled.borrow().contains_key(scope)
    }

    fn try_hold(&self, scope: &NotificationScope, notification: &Notification) -> bool {
        let mut holds = self.holds.borrow_mut();
        let Some(state) = holds.get_mut(scope) else {
            return false;
        };
        let repeat = state
            .held
            .last()
            .is_some_and(|last| last.same_event(notification));
        if !repeat {
            state.held.push(notification.clone());
        }
        true
    }

    /// Observers in delivery order: name+observable, name, observable, any.
    fn snapshot(&self, name: &str, source: ObjectId) -> Vec<Rc<dyn ObserverSlot>> {
        let registry = self.registry.borrow();
        let keys = [
            (Some(name.to_owned()), Some(source)),
            (Some(name.to_owned()), None),
            (None, Some(source)),
            (None, None),
        ];
        keys.iter()
            .filter_map(|key| registry.get(key))
            .flat_map(|registration| registration.observers.iter().cloned())
            .collect()
    }
}
